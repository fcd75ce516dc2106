//! Owns every live process handle. Other components reach processes only
//! through the operations here, keyed by instance name.

mod slot;

use std::{
    collections::{BTreeMap, HashMap},
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use chrono::Utc;
use tokio::{
    net::TcpStream,
    sync::{RwLock, broadcast},
    time::{Instant, sleep, timeout},
};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, warn};

pub use slot::{ExitObservation, ProcessInfo};
use slot::{Slot, SlotState};

use crate::{
    config::{
        EventPayload, InstanceEvent, LaunchSettings, Properties, StreamLine, SupervisorSettings,
    },
    error::{ServerError, SubscribeError},
    instance::{Instance, InstanceStatus, ProcessHandle, RuntimeState},
    store::Store,
    utils::{pid_alive, pid_runs_in},
};

const DEFAULT_SERVER_PORT: u16 = 25565;
const READY_POLL: Duration = Duration::from_millis(250);
const EVENT_CAPACITY: usize = 512;

pub struct ProcessSupervisor {
    store: Arc<dyn Store>,
    settings: SupervisorSettings,
    slots: RwLock<HashMap<String, Arc<Slot>>>,
    events: broadcast::Sender<InstanceEvent>,
}

impl ProcessSupervisor {
    pub fn new(store: Arc<dyn Store>, settings: SupervisorSettings) -> Self {
        Self {
            store,
            settings,
            slots: RwLock::new(HashMap::new()),
            events: broadcast::Sender::new(EVENT_CAPACITY),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Adds an instance to the process table. A recorded pid that is still
    /// alive and running from the instance root is adopted as Running; any
    /// other recorded pid is cleared.
    pub async fn register(&self, instance: Instance) -> InstanceStatus {
        let mut slots = self.slots.write().await;
        if let Some(slot) = slots.get(&instance.name) {
            return slot.state.lock().await.status;
        }

        let name = instance.name.clone();
        let adopted = instance
            .pid
            .filter(|pid| pid_alive(*pid))
            .filter(|pid| {
                let owned = pid_runs_in(*pid, &instance.root_dir);
                if !owned {
                    warn!(instance = %name, pid, "recorded pid belongs to another process");
                }
                owned
            })
            .map(|pid| ProcessHandle::adopt(pid, instance.session_id.clone(), self.settings.session));

        let state = match adopted {
            Some(handle) => {
                info!(instance = %name, pid = handle.pid(), "adopted running server");
                SlotState {
                    instance,
                    status: InstanceStatus::Running,
                    handle: Some(handle),
                    expected_stop: false,
                }
            }
            None => {
                if instance.status.is_live() {
                    warn!(
                        instance = %name,
                        recorded = ?instance.status,
                        "recorded process is gone, marking stopped"
                    );
                }
                SlotState {
                    instance,
                    status: InstanceStatus::Stopped,
                    handle: None,
                    expected_stop: false,
                }
            }
        };

        let status = state.status;
        let runtime = state.runtime();
        let changed = state.instance.status != status || state.instance.pid != runtime.pid;
        slots.insert(name.clone(), Arc::new(Slot::new(state)));
        drop(slots);

        if changed {
            self.persist(&name, runtime).await;
        }
        status
    }

    async fn slot(&self, name: &str) -> Result<Arc<Slot>, ServerError> {
        if let Some(slot) = self.slots.read().await.get(name) {
            return Ok(slot.clone());
        }

        let instance = self
            .store
            .get_instance(name)
            .await?
            .ok_or_else(|| ServerError::UnknownInstance(name.to_string()))?;
        self.register(instance).await;

        self.slots
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| ServerError::UnknownInstance(name.to_string()))
    }

    /// Launches the instance and waits for readiness. Returns the current
    /// status unchanged when it is already Starting or Running.
    pub async fn start_server(&self, name: &str) -> Result<InstanceStatus, ServerError> {
        let slot = self.slot(name).await?;
        let _op = slot.op.lock().await;
        self.start_locked(name, &slot).await
    }

    async fn start_locked(&self, name: &str, slot: &Slot) -> Result<InstanceStatus, ServerError> {
        let instance = {
            let mut state = slot.state.lock().await;
            match state.status {
                InstanceStatus::Starting | InstanceStatus::Running => {
                    debug!(instance = %name, status = ?state.status, "start ignored");
                    return Ok(state.status);
                }
                _ => {}
            }
            if let Some(pid) = state
                .handle
                .as_ref()
                .filter(|h| h.is_alive())
                .map(ProcessHandle::pid)
            {
                return Err(ServerError::PreviousAlive { pid });
            }
            state.handle = None;
            state.instance.clone()
        };

        let config = self.store.configuration(name).await?;
        let launch = config.launch;
        let kind = self.settings.session;

        let spawn_instance = instance.clone();
        let spawn_launch = launch.clone();
        let handle = tokio::task::spawn_blocking(move || {
            ProcessHandle::spawn(&spawn_instance, &spawn_launch, kind)
        })
        .await
        .map_err(|e| ServerError::Spawn {
            source: std::io::Error::other(e),
        })??;

        let runtime = {
            let mut state = slot.state.lock().await;
            state.handle = Some(handle.clone());
            state.expected_stop = false;
            let old = state.transition(InstanceStatus::Starting);
            self.emit(InstanceEvent::state_change(name, old, InstanceStatus::Starting));
            state.runtime()
        };
        self.persist(name, runtime).await;

        match self.await_ready(&handle, &instance, &launch).await {
            Ok(()) => {
                let runtime = {
                    let mut state = slot.state.lock().await;
                    let old = state.transition(InstanceStatus::Running);
                    self.emit(InstanceEvent::state_change(name, old, InstanceStatus::Running));
                    state.runtime()
                };
                self.persist(name, runtime).await;
                info!(instance = %name, pid = handle.pid(), "server running");
                Ok(InstanceStatus::Running)
            }
            Err(reason) => {
                handle.kill_group();
                {
                    let mut state = slot.state.lock().await;
                    state.handle = None;
                    let old = state.transition(InstanceStatus::Stopped);
                    self.emit(InstanceEvent::state_change(name, old, InstanceStatus::Stopped));
                }
                self.persist(name, RuntimeState::stopped()).await;
                warn!(instance = %name, %reason, "server exited during startup");
                Err(ServerError::EarlyCrash(reason))
            }
        }
    }

    /// Readiness: the process survives the settle delay and, when asked
    /// for, `server-port` accepts TCP connections. A server that stays
    /// alive past the startup timeout is treated as ready.
    async fn await_ready(
        &self,
        handle: &ProcessHandle,
        instance: &Instance,
        launch: &LaunchSettings,
    ) -> Result<(), String> {
        let exited = |handle: &ProcessHandle| {
            handle
                .exit_info()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "process vanished".to_string())
        };

        sleep(self.settings.settle()).await;
        if !handle.is_alive() {
            return Err(exited(handle));
        }
        if !launch.wait_for_port {
            return Ok(());
        }

        let port = Properties::load(&instance.root_dir.join("server.properties"))
            .await
            .ok()
            .and_then(|p| p.get_parsed::<u16>("server-port"))
            .filter(|p| *p != 0)
            .unwrap_or(DEFAULT_SERVER_PORT);
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        let deadline = Instant::now() + self.settings.startup_timeout();

        loop {
            if !handle.is_alive() {
                return Err(exited(handle));
            }
            if let Ok(Ok(_)) = timeout(READY_POLL, TcpStream::connect(addr)).await {
                return Ok(());
            }
            if Instant::now() >= deadline {
                warn!(
                    instance = %instance.name,
                    port,
                    "port not listening before startup timeout, assuming ready"
                );
                return Ok(());
            }
            sleep(READY_POLL).await;
        }
    }

    /// Stops the instance. A no-op when nothing is running.
    pub async fn stop_server(
        &self,
        name: &str,
        graceful: bool,
    ) -> Result<InstanceStatus, ServerError> {
        let slot = self.slot(name).await?;
        let _op = slot.op.lock().await;
        self.stop_locked(name, &slot, graceful).await
    }

    /// Forced termination, skipping the in-band stop command.
    pub async fn kill_server(&self, name: &str) -> Result<InstanceStatus, ServerError> {
        self.stop_server(name, false).await
    }

    /// Stop then start under a single hold of the control lock.
    pub async fn restart_server(&self, name: &str) -> Result<InstanceStatus, ServerError> {
        let slot = self.slot(name).await?;
        let _op = slot.op.lock().await;
        self.stop_locked(name, &slot, true).await?;
        self.start_locked(name, &slot).await
    }

    async fn stop_locked(
        &self,
        name: &str,
        slot: &Slot,
        graceful: bool,
    ) -> Result<InstanceStatus, ServerError> {
        let (handle, runtime) = {
            let mut state = slot.state.lock().await;
            let Some(handle) = state.handle.clone() else {
                if state.status != InstanceStatus::Stopped {
                    let old = state.transition(InstanceStatus::Stopped);
                    let runtime = state.runtime();
                    drop(state);
                    self.emit(InstanceEvent::state_change(name, old, InstanceStatus::Stopped));
                    self.persist(name, runtime).await;
                } else {
                    debug!(instance = %name, "stop ignored, nothing running");
                }
                return Ok(InstanceStatus::Stopped);
            };
            state.expected_stop = true;
            let old = state.transition(InstanceStatus::Stopping);
            if old != InstanceStatus::Stopping {
                self.emit(InstanceEvent::state_change(name, old, InstanceStatus::Stopping));
            }
            (handle, state.runtime())
        };
        self.persist(name, runtime).await;

        let mut exited = !handle.is_alive();
        if graceful && !exited {
            let stop_command = match self.store.configuration(name).await {
                Ok(config) => config.launch.stop_command,
                Err(e) => {
                    warn!(instance = %name, error = %e, "falling back to default stop command");
                    LaunchSettings::default().stop_command
                }
            };
            match handle.send_command(stop_command).await {
                Ok(()) => {
                    exited = handle.wait_for_exit(self.settings.stop_timeout()).await;
                    if !exited {
                        warn!(
                            instance = %name,
                            secs = self.settings.stop_timeout_secs,
                            "graceful stop timed out, forcing termination"
                        );
                    }
                }
                Err(e) => {
                    warn!(instance = %name, error = %e, "stop command not delivered, forcing termination");
                }
            }
        }

        if !exited {
            handle.kill_tree();
            if !handle.wait_for_exit(self.settings.kill_timeout()).await {
                return Err(ServerError::StopTimeout {
                    pid: handle.pid(),
                    secs: self.settings.kill_timeout_secs,
                });
            }
        }
        handle.kill_group();

        {
            let mut state = slot.state.lock().await;
            state.handle = None;
            let old = state.transition(InstanceStatus::Stopped);
            self.emit(InstanceEvent::state_change(name, old, InstanceStatus::Stopped));
        }
        self.persist(name, RuntimeState::stopped()).await;
        info!(instance = %name, pid = handle.pid(), graceful, "server stopped");
        Ok(InstanceStatus::Stopped)
    }

    /// Snapshot of Starting, Running and Stopping instances. Each entry is
    /// read under the same lock its mutations take.
    pub async fn get_server_processes(&self) -> BTreeMap<String, ProcessInfo> {
        let slots: Vec<(String, Arc<Slot>)> = self
            .slots
            .read()
            .await
            .iter()
            .map(|(name, slot)| (name.clone(), slot.clone()))
            .collect();

        let now = Utc::now();
        let mut out = BTreeMap::new();
        for (name, slot) in slots {
            let state = slot.state.lock().await;
            if !state.status.is_live() {
                continue;
            }
            let Some(handle) = &state.handle else {
                continue;
            };
            out.insert(
                name,
                ProcessInfo {
                    pid: handle.pid(),
                    session_id: handle.session_id().to_string(),
                    status: state.status,
                    started_at: handle.started_at(),
                    uptime: (now - handle.started_at()).to_std().unwrap_or_default(),
                    adopted: handle.is_adopted(),
                },
            );
        }
        out
    }

    /// Recorded pid combined with an OS-level liveness test. Never changes
    /// status.
    pub async fn is_server_running(&self, name: &str) -> Result<bool, ServerError> {
        let slot = self.slot(name).await?;
        let state = slot.state.lock().await;
        Ok(state.handle.as_ref().is_some_and(ProcessHandle::is_alive))
    }

    pub async fn status(&self, name: &str) -> Result<InstanceStatus, ServerError> {
        let slot = self.slot(name).await?;
        Ok(slot.state.lock().await.status)
    }

    /// Names of every registered instance currently Running.
    pub async fn running_instances(&self) -> Vec<String> {
        let slots: Vec<(String, Arc<Slot>)> = self
            .slots
            .read()
            .await
            .iter()
            .map(|(name, slot)| (name.clone(), slot.clone()))
            .collect();

        let mut out = Vec::new();
        for (name, slot) in slots {
            if slot.state.lock().await.status == InstanceStatus::Running {
                out.push(name);
            }
        }
        out.sort();
        out
    }

    /// Takes the `Running → Stopped` crash edge when the process is gone and
    /// no stop was requested. Instances with a control operation in
    /// progress are left alone.
    pub async fn observe_exit(&self, name: &str) -> Option<ExitObservation> {
        let slot = self.slots.read().await.get(name).cloned()?;
        let Ok(_op) = slot.op.try_lock() else {
            debug!(instance = %name, "control operation in progress, skipping");
            return None;
        };

        let observation = {
            let mut state = slot.state.lock().await;
            if state.status != InstanceStatus::Running {
                return None;
            }
            let handle = state.handle.clone()?;
            if handle.is_alive() {
                return None;
            }

            state.handle = None;
            let old = state.transition(InstanceStatus::Stopped);
            if std::mem::take(&mut state.expected_stop) {
                debug!(instance = %name, "exit was requested");
                self.emit(InstanceEvent::state_change(name, old, InstanceStatus::Stopped));
                drop(state);
                self.persist(name, RuntimeState::stopped()).await;
                return None;
            }

            self.emit(InstanceEvent::new(
                name,
                EventPayload::Crashed { pid: handle.pid() },
            ));
            self.emit(InstanceEvent::state_change(name, old, InstanceStatus::Stopped));
            handle.kill_group();

            ExitObservation {
                instance: state.instance.clone(),
                pid: handle.pid(),
                session_id: handle.session_id().to_string(),
                started_at: handle.started_at(),
                exit: handle.exit_info(),
                recent_output: handle.recent_output(),
                last_output_at: handle.last_output_at(),
            }
        };

        self.persist(name, RuntimeState::stopped()).await;
        warn!(
            instance = %name,
            pid = observation.pid,
            exit = ?observation.exit,
            "server process exited unexpectedly"
        );
        Some(observation)
    }

    /// Writes an in-band command to a Starting or Running server's session.
    pub async fn send_command(&self, name: &str, command: &str) -> Result<(), ServerError> {
        let handle = {
            let slot = self.slot(name).await?;
            let state = slot.state.lock().await;
            match (&state.handle, state.status) {
                (Some(handle), InstanceStatus::Starting | InstanceStatus::Running) => {
                    handle.clone()
                }
                _ => return Err(ServerError::NotRunning),
            }
        };
        handle.send_command(command).await
    }

    pub async fn subscribe_output(
        &self,
        name: &str,
    ) -> Result<BroadcastStream<StreamLine>, SubscribeError> {
        let slot = self
            .slot(name)
            .await
            .map_err(|_| SubscribeError::UnknownInstance(name.to_string()))?;
        let state = slot.state.lock().await;
        state
            .handle
            .as_ref()
            .and_then(ProcessHandle::subscribe)
            .ok_or(SubscribeError::NoOutput)
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<InstanceEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: InstanceEvent) {
        debug!(%event, "instance event");
        let _ = self.events.send(event);
    }

    async fn persist(&self, name: &str, runtime: RuntimeState) {
        if let Err(e) = self.store.update_runtime(name, runtime).await {
            warn!(instance = %name, error = %e, "failed to persist runtime state");
        }
    }
}
