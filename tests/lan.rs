#![cfg(feature = "lan")]

mod common;

use std::{net::SocketAddrV4, time::Duration};

use common::{SERVER, fixture};
use mineguard_supervisor::{config::LanSettings, lan::LanAnnouncer};
use tokio::net::UdpSocket;

async fn receiver() -> (UdpSocket, SocketAddrV4) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = match socket.local_addr().unwrap() {
        std::net::SocketAddr::V4(addr) => addr,
        other => panic!("unexpected address {other}"),
    };
    (socket, addr)
}

#[tokio::test(flavor = "multi_thread")]
async fn announces_only_running_lan_enabled_instances() {
    let fx = fixture();
    let root = fx
        .add_instance("survival", SERVER, |c| c.lan_broadcast = true)
        .await;
    std::fs::write(
        root.join("server.properties"),
        "#Minecraft server properties\nmotd=A Server\nserver-port=25565\n",
    )
    .unwrap();
    fx.add_instance("private", SERVER, |_| {}).await;
    fx.add_instance("idle", SERVER, |c| c.lan_broadcast = true)
        .await;

    fx.supervisor.start_server("survival").await.unwrap();
    fx.supervisor.start_server("private").await.unwrap();

    let (socket, addr) = receiver().await;
    let settings = LanSettings {
        target: addr,
        ..Default::default()
    };
    let announcer = LanAnnouncer::bind(fx.supervisor.clone(), &settings)
        .await
        .unwrap();

    let sent = announcer.announce_once().await;
    assert_eq!(
        sent,
        vec![(
            "survival".to_string(),
            "[MOTD]A Server[/MOTD][AD]25565[/AD]".to_string()
        )]
    );

    let mut buf = [0u8; 256];
    let len = tokio::time::timeout(Duration::from_secs(2), socket.recv(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf[..len], b"[MOTD]A Server[/MOTD][AD]25565[/AD]");

    fx.supervisor.stop_server("survival", true).await.unwrap();
    fx.supervisor.stop_server("private", true).await.unwrap();
    assert!(announcer.announce_once().await.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_properties_fall_back_to_name_and_default_port() {
    let fx = fixture();
    fx.add_instance("creative", SERVER, |c| c.lan_broadcast = true)
        .await;
    fx.supervisor.start_server("creative").await.unwrap();

    let (_socket, addr) = receiver().await;
    let settings = LanSettings {
        target: addr,
        ..Default::default()
    };
    let announcer = LanAnnouncer::bind(fx.supervisor.clone(), &settings)
        .await
        .unwrap();

    assert_eq!(
        announcer.announce_once().await[0].1,
        "[MOTD]creative[/MOTD][AD]25565[/AD]"
    );
    fx.supervisor.stop_server("creative", true).await.unwrap();
}
