//! ZeroMQ front end of the daemon.
//!
//! A ROUTER socket accepts client connections and a steerable proxy fans
//! requests out over an inproc DEALER to a fixed set of REP worker threads.
//! Workers run the facade on the daemon's tokio runtime, so requests from
//! different clients are served concurrently.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

use super::protocol::{Reply, Request, decode, encode};
use super::service::ServiceFacade;
use crate::error::{ServiceError, ServiceResult};

const WORKERS_ENDPOINT: &str = "inproc://uptimed-workers";
const CONTROL_ENDPOINT: &str = "inproc://uptimed-control";

/// How often an idle worker wakes up to look at the stop flag
const WORKER_POLL_MS: i32 = 200;

/// Running server; dropping it without [`ServerHandle::shutdown`] leaves the
/// threads running until the process exits.
pub struct ServerHandle {
    control: zmq::Socket,
    stop: Arc<AtomicBool>,
    proxy: Option<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
}

/// Bind `endpoint` and start serving requests.
///
/// Binding happens before this returns, so an address in use is reported to
/// the caller instead of inside a thread.
pub fn spawn(
    endpoint: &str,
    workers: usize,
    facade: Arc<ServiceFacade>,
    runtime: Handle,
) -> ServiceResult<ServerHandle> {
    // One context per server keeps the inproc names private to it.
    let context = zmq::Context::new();

    let mut frontend = context.socket(zmq::ROUTER)?;
    frontend.set_linger(0)?;
    frontend
        .bind(endpoint)
        .map_err(|e| ServiceError::Transport(format!("failed to bind {endpoint}: {e}")))?;

    let mut backend = context.socket(zmq::DEALER)?;
    backend.set_linger(0)?;
    backend.bind(WORKERS_ENDPOINT)?;

    let mut proxy_control = context.socket(zmq::PAIR)?;
    proxy_control.bind(CONTROL_ENDPOINT)?;
    let control = context.socket(zmq::PAIR)?;
    control.set_linger(0)?;
    control.connect(CONTROL_ENDPOINT)?;

    let stop = Arc::new(AtomicBool::new(false));

    let mut handles = Vec::with_capacity(workers);
    for index in 0..workers {
        let socket = context.socket(zmq::REP)?;
        socket.set_linger(0)?;
        socket.set_rcvtimeo(WORKER_POLL_MS)?;
        socket.connect(WORKERS_ENDPOINT)?;

        let facade = facade.clone();
        let runtime = runtime.clone();
        let stop = stop.clone();
        let handle = thread::Builder::new()
            .name(format!("uptimed-worker-{index}"))
            .spawn(move || serve(socket, &facade, &runtime, &stop))
            .map_err(|e| ServiceError::Transport(format!("failed to start worker: {e}")))?;
        handles.push(handle);
    }

    let proxy = thread::Builder::new()
        .name("uptimed-proxy".to_string())
        .spawn(move || {
            if let Err(e) = zmq::proxy_steerable(&mut frontend, &mut backend, &mut proxy_control) {
                error!("Request proxy stopped: {}", e);
            }
        })
        .map_err(|e| ServiceError::Transport(format!("failed to start proxy: {e}")))?;

    info!(%endpoint, workers, "Daemon listening");
    Ok(ServerHandle { control, stop, proxy: Some(proxy), workers: handles })
}

impl ServerHandle {
    /// Stop accepting requests and wait for every thread to exit.
    ///
    /// Blocks; call it from a blocking context. A worker in the middle of a
    /// request finishes it first.
    pub fn shutdown(mut self) {
        self.stop.store(true, Ordering::Release);

        if let Err(e) = self.control.send("TERMINATE", 0) {
            warn!("Failed to signal request proxy: {}", e);
        }
        if let Some(proxy) = self.proxy.take() {
            let _ = proxy.join();
        }
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }

        info!("Daemon stopped listening");
    }
}

fn serve(socket: zmq::Socket, facade: &ServiceFacade, runtime: &Handle, stop: &AtomicBool) {
    while !stop.load(Ordering::Acquire) {
        let frame = match socket.recv_bytes(0) {
            Ok(frame) => frame,
            Err(zmq::Error::EAGAIN) => continue,
            Err(zmq::Error::ETERM) => break,
            Err(e) => {
                warn!("Worker receive failed: {}", e);
                break;
            }
        };

        let reply = match decode::<Request>(&frame) {
            Ok(request) => runtime.block_on(facade.dispatch(request)),
            Err(e) => {
                debug!("Rejecting malformed request: {}", e);
                Reply::Error(e)
            }
        };

        // A REP socket must answer before it can receive again.
        let frame = encode(&reply).unwrap_or_else(|e| {
            error!("Failed to encode reply: {}", e);
            br#"{"error":{"kind":"transport","message":"failed to encode reply"}}"#.to_vec()
        });
        if let Err(e) = socket.send(frame, 0) {
            warn!("Worker send failed: {}", e);
        }
    }
}
