//! Frame dispatch and the ENTER / SET / PING / BYE handlers.
//!
//! Handlers return `Ok(())` to keep the connection open (including on
//! command-level validation failures, which only log) and `Err` for
//! connection-fatal conditions; the event loop turns an `Err` into a close.

use scenecast_core::wire::{self, ForwardAddress};
use scenecast_core::{ConnectionError, ConnectionResult, Providers};
use tracing::{error, info};

use crate::ident;
use crate::server::RelayState;

/// Dispatch the frame most recently assembled on `socket`.
///
/// Re-extracts the forward address from the header, logs the printable
/// payload, and routes `RQ` frames to their command handler. `AN` frames are
/// the relay's own acknowledgements echoed back; they are logged and
/// ignored.
pub fn dispatch_frame<P: Providers>(
    state: &mut RelayState<P>,
    socket: u64,
) -> ConnectionResult<()> {
    let Some(conn) = state.connections.get(socket) else {
        return Ok(());
    };

    let (payload, peer) = {
        let mut c = conn.borrow_mut();
        let len = c.packet_len();
        if len <= wire::DATA_OFFSET {
            return Err(ConnectionError::ShortPacket(len));
        }
        let forward = ForwardAddress::decode(&c.frame_bytes()[..wire::DATA_OFFSET]);
        c.set_forward(forward);
        (c.frame_bytes()[wire::DATA_OFFSET..].to_vec(), c.peer())
    };

    if payload.len() <= 3 {
        return Err(ConnectionError::ShortPacket(payload.len()));
    }
    if payload[2] != 0 {
        return Err(ConnectionError::MalformedRequest("tag is not NUL terminated"));
    }

    match (payload[0], payload[1]) {
        (b'R', b'Q') => {
            info!(
                "< {} {} {}",
                peer,
                payload.len() + wire::DATA_OFFSET,
                wire::printable(&payload, payload.len())
            );
            handle_request(state, socket, &payload)
        }
        (b'A', b'N') => {
            // The acknowledgement this relay sent, parroted back. Nothing
            // to do with it beyond the trace.
            info!(
                "< {} {} {}",
                peer,
                payload.len() + wire::DATA_OFFSET,
                wire::printable(&payload, payload.len())
            );
            Ok(())
        }
        (first, second) => Err(ConnectionError::BadTag(first, second)),
    }
}

fn handle_request<P: Providers>(
    state: &mut RelayState<P>,
    socket: u64,
    payload: &[u8],
) -> ConnectionResult<()> {
    let args = wire::parse_arguments(payload);

    if args.len() < 4 {
        return Err(ConnectionError::MalformedRequest("fewer than four arguments"));
    }
    if args[1].is_empty() {
        return Err(ConnectionError::MalformedRequest("empty packet id"));
    }
    if args[2].is_empty() {
        return Err(ConnectionError::MalformedRequest("empty connection id"));
    }
    if args[3].is_empty() {
        return Err(ConnectionError::MalformedRequest("empty command"));
    }

    match args[3].as_str() {
        "ENTER" => handle_enter(state, socket, &args),
        "SET" => handle_set(state, socket, &args),
        "PING" => {
            let Some(conn) = state.connections.get(socket) else {
                return Ok(());
            };
            conn.borrow_mut()
                .send_arguments(&["AN", &args[1], &args[2], "PONG"])
        }
        "BYE" => handle_bye(state, socket, &args),
        _ => Ok(()),
    }
}

fn check_client_value(
    value: Option<&str>,
    missing: &'static str,
    bad_leading: &'static str,
) -> ConnectionResult<()> {
    let Some(value) = value else {
        return Err(ConnectionError::MalformedRequest(missing));
    };
    if value.is_empty() {
        return Err(ConnectionError::MalformedRequest(missing));
    }
    if !value.as_bytes()[0].is_ascii_alphabetic() {
        error!("{}: {:?}", bad_leading, value);
        return Err(ConnectionError::MalformedRequest(bad_leading));
    }
    Ok(())
}

/// ENTER: join (or create) the scene named by SCU.
///
/// Idempotent guard: a connection that already carries an SCU ignores
/// further ENTERs until a BYE clears it.
fn handle_enter<P: Providers>(
    state: &mut RelayState<P>,
    socket: u64,
    args: &[String],
) -> ConnectionResult<()> {
    let Some(conn) = state.connections.get(socket) else {
        return Ok(());
    };

    {
        let mut c = conn.borrow_mut();
        if c.scene_url.is_some() {
            return Ok(());
        }
        c.nickname = None;
        c.scene_name = None;
        c.scene_url = None;

        let mut i = 4;
        while i < args.len() {
            let has_value = i + 1 < args.len();
            match args[i].as_str() {
                "NNM" if has_value => {
                    c.nickname = Some(args[i + 1].clone());
                    i += 2;
                }
                "SCU" if has_value => {
                    c.scene_url = Some(args[i + 1].clone());
                    i += 2;
                }
                "SCN" if has_value => {
                    c.scene_name = Some(args[i + 1].clone());
                    i += 2;
                }
                _ => i += 1,
            }
        }

        check_client_value(
            c.nickname.as_deref(),
            "NNM missing in RQ ENTER",
            "NNM does not start with a letter in RQ ENTER",
        )?;
        check_client_value(
            c.scene_name.as_deref(),
            "SCN missing in RQ ENTER",
            "SCN does not start with a letter in RQ ENTER",
        )?;
        check_client_value(
            c.scene_url.as_deref(),
            "SCU missing in RQ ENTER",
            "SCU does not start with a letter in RQ ENTER",
        )?;
    }

    let client_id = ident::client_id(state.providers.random());
    let (conn_id, url, name, nickname) = {
        let mut c = conn.borrow_mut();
        c.client_id = Some(client_id.clone());
        (
            c.id().to_string(),
            c.scene_url.clone().unwrap_or_default(),
            c.scene_name.clone().unwrap_or_default(),
            c.nickname.clone().unwrap_or_default(),
        )
    };
    info!("new client: id {} client id {}", conn_id, client_id);

    let scene = match state.scenes.find_by_url(&url) {
        Some(scene) => {
            scene.borrow_mut().members.insert(socket);
            scene
        }
        None => {
            let scene = state.scenes.create(&url, &name, socket);
            {
                let s = scene.borrow();
                info!("new scene: id {} url {} name {}", s.id, s.url, s.name);
            }
            scene
        }
    };
    let scene_id = scene.borrow().id.clone();

    conn.borrow_mut().send_arguments(&[
        "AN", &args[1], &conn_id, "HI", "CLID", &client_id, "SCID", &scene_id, "NNM", &nickname,
    ])
}

/// SET: acknowledge the sender, then fan the pair out to every member of
/// the sender's scene, the sender included.
fn handle_set<P: Providers>(
    state: &mut RelayState<P>,
    socket: u64,
    args: &[String],
) -> ConnectionResult<()> {
    let Some(conn) = state.connections.get(socket) else {
        return Ok(());
    };
    let scene = {
        let c = conn.borrow();
        c.scene_url
            .as_deref()
            .and_then(|url| state.scenes.find_by_url(url))
    };
    let Some(scene) = scene else {
        return Ok(());
    };

    let mut scid: Option<&str> = None;
    let mut key: Option<&str> = None;
    let mut value: Option<&str> = None;
    let mut i = 4;
    while i < args.len() {
        let has_value = i + 1 < args.len();
        match args[i].as_str() {
            "SCID" if has_value => {
                scid = Some(args[i + 1].as_str());
                i += 2;
            }
            "CHID" if has_value => {
                // Channel hint: consumed and discarded.
                i += 2;
            }
            _ if has_value => {
                key = Some(args[i].as_str());
                value = Some(args[i + 1].as_str());
                i += 2;
            }
            _ => i += 1,
        }
    }

    let Some(scid) = scid else {
        error!("missing SCID in RQ SET");
        return Ok(());
    };
    if scid != scene.borrow().id {
        error!("bad SCID {:?} in RQ SET", scid);
        return Ok(());
    }
    let Some(key) = key else {
        error!("missing key in RQ SET");
        return Ok(());
    };
    if key.is_empty() {
        error!("empty key in RQ SET");
        return Ok(());
    }
    let Some(value) = value else {
        error!("missing value in RQ SET");
        return Ok(());
    };

    conn.borrow_mut()
        .send_arguments(&["AN", &args[1], &args[2], "OK"])?;

    let members: Vec<u64> = {
        let s = scene.borrow();
        s.members.iter().copied().collect()
    };
    for member in members {
        let Some(target) = state.connections.get(member) else {
            continue;
        };
        let request_id = state.request_ids.next_id();
        let target_id = target.borrow().id().to_string();
        let result = target.borrow_mut().send_arguments(&[
            "RQ", &request_id, &target_id, "SET", "SCID", scid, key, value,
        ]);
        if let Err(err) = result {
            // The faulty recipient goes away right here; the error still
            // propagates and takes the dispatching connection with it.
            state.close_connection(member);
            return Err(err);
        }
    }
    Ok(())
}

/// BYE: leave the scene so a later ENTER may rebind.
///
/// Requires a CLID argument matching the client id handed out on ENTER;
/// anything else is silently ignored. The connection stays open.
fn handle_bye<P: Providers>(
    state: &mut RelayState<P>,
    socket: u64,
    args: &[String],
) -> ConnectionResult<()> {
    let Some(conn) = state.connections.get(socket) else {
        return Ok(());
    };
    let scene = {
        let c = conn.borrow();
        c.scene_url
            .as_deref()
            .and_then(|url| state.scenes.find_by_url(url))
    };
    let Some(scene) = scene else {
        return Ok(());
    };

    let mut clid: Option<&str> = None;
    let mut i = 4;
    while i < args.len() {
        if args[i] == "CLID" && i + 1 < args.len() {
            clid = Some(args[i + 1].as_str());
            i += 2;
        } else {
            i += 1;
        }
    }

    {
        let c = conn.borrow();
        if clid.is_none() || c.client_id.as_deref() != clid {
            return Ok(());
        }
    }

    let result = conn.borrow_mut().send_arguments(&["AN", &args[1], &args[2]]);

    {
        let mut c = conn.borrow_mut();
        c.scene_url = None;
        c.forward_addr = None;
    }

    let now_empty = {
        let mut s = scene.borrow_mut();
        s.members.remove(&socket);
        s.members.is_empty()
    };
    if now_empty {
        {
            let s = scene.borrow();
            info!("scene destroyed: id {} url {}", s.id, s.url);
        }
        state.scenes.destroy(&scene);
    }

    result
}
