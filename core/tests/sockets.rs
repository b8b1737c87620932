//! Availability checks against real loopback sockets.

use std::net::{TcpListener, UdpSocket};

use procport_core::adapters::try_bind;
use procport_core::{Config, Context, HostPlatform, PlatformAdapter, Protocol};

#[test]
fn test_try_bind_tcp() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    assert!(!try_bind(port, Protocol::Tcp).unwrap());

    drop(listener);
    assert!(try_bind(port, Protocol::Tcp).unwrap());
}

#[test]
fn test_try_bind_udp() {
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    let port = socket.local_addr().unwrap().port();
    assert!(!try_bind(port, Protocol::Udp).unwrap());

    drop(socket);
    assert!(try_bind(port, Protocol::Udp).unwrap());
}

#[tokio::test]
async fn test_native_adapter_sees_held_port() {
    let Ok(platform) = HostPlatform::current() else {
        return;
    };
    let context = Context::for_platform(Config::default(), platform);

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    // whichever tool answers (or the bind check), a held port is never free
    assert!(!context.adapter().is_port_available(port, Protocol::Tcp).await);
}

#[tokio::test]
async fn test_native_adapter_sees_held_udp_port() {
    let Ok(platform) = HostPlatform::current() else {
        return;
    };
    let context = Context::for_platform(Config::default(), platform);

    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    let port = socket.local_addr().unwrap().port();

    assert!(!context.adapter().is_port_available(port, Protocol::Udp).await);
}

#[tokio::test]
async fn test_find_free_port_skips_held_port() {
    let Ok(platform) = HostPlatform::current() else {
        return;
    };
    let context = Context::for_platform(Config::default(), platform);

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let held = listener.local_addr().unwrap().port();

    let result = context
        .port_scanner()
        .find_free_port(held, held, Protocol::Tcp)
        .await;
    let err = tokio_test::assert_err!(result);
    assert_eq!(err.code(), "NO_FREE_PORT");
}
