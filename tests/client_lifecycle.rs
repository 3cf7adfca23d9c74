mod common;

use std::net::TcpListener;

use anyhow::Result;

use common::{sees_eof, FakeGateway, ScriptedDecoder};
use msdk_remote::{ChannelKind, Client, Error};

#[test]
fn connect_fails_as_a_whole_when_one_port_is_closed() -> Result<()> {
    let gateway = FakeGateway::bind()?;
    let mut config = gateway.config()?;
    let closed_port = {
        let probe = TcpListener::bind("127.0.0.1:0")?;
        probe.local_addr()?.port()
    };
    config.query_port = closed_port;

    let err = match Client::connect_with_decoder(&config, Box::new(ScriptedDecoder)) {
        Ok(_) => panic!("connect should fail with the query port closed"),
        Err(err) => err,
    };
    match err {
        Error::Connect { channel, addr, .. } => {
            assert_eq!(channel, ChannelKind::Query);
            assert_eq!(addr, format!("127.0.0.1:{closed_port}"));
        }
        other => panic!("unexpected error: {other}"),
    }

    // Video and control were connected first and must have been released.
    let (mut video, _) = gateway.video.accept()?;
    let (mut control, _) = gateway.control.accept()?;
    video.set_read_timeout(Some(common::IO_TIMEOUT))?;
    control.set_read_timeout(Some(common::IO_TIMEOUT))?;
    assert!(sees_eof(&mut video)?);
    assert!(sees_eof(&mut control)?);
    Ok(())
}

#[test]
fn unresolvable_host_is_reported() -> Result<()> {
    let gateway = FakeGateway::bind()?;
    let mut config = gateway.config()?;
    config.host = "gateway.invalid".to_string();

    let err = Client::connect_with_decoder(&config, Box::new(ScriptedDecoder))
        .err()
        .expect("connect should fail");
    assert!(matches!(err, Error::InvalidAddress(_)), "got {err}");
    Ok(())
}

#[test]
fn close_is_idempotent_and_releases_every_socket() -> Result<()> {
    let gateway = FakeGateway::bind()?;
    let (client, peers) = gateway.connect()?;
    assert_eq!(client.host(), "127.0.0.1");
    assert!(client.video().is_running());
    assert!(client.control().is_running());
    assert!(client.query().is_running());

    client.close()?;
    assert!(client.is_closed());
    client.close()?;

    assert!(!client.video().is_running());
    assert!(!client.control().is_running());
    assert!(!client.query().is_running());

    let mut video = peers.video;
    assert!(sees_eof(&mut video)?);
    Ok(())
}

#[test]
fn dropping_the_client_closes_it() -> Result<()> {
    let gateway = FakeGateway::bind()?;
    let (client, peers) = gateway.connect()?;
    drop(client);

    let mut video = peers.video;
    assert!(sees_eof(&mut video)?);
    Ok(())
}
