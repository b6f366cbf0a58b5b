//! The TCP accept loop and per-connection I/O driver. A `tokio` runtime
//! pinned to `current_thread`, so "no locking because there is no sharing"
//! stays literally true — the table lives behind an `Rc<RefCell<_>>` shared
//! only among same-thread tasks, never an `Arc<Mutex<_>>`.

use std::cell::RefCell;
use std::io;
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use protocol::Limits;
use store::Table;

use crate::config::ServerConfig;
use crate::connection::Connection;
use crate::error::DaemonError;

/// The size of one `read()` call's scratch buffer. Unrelated to any
/// protocol limit — just an I/O chunk size.
const READ_CHUNK: usize = 64 * 1024;

/// Seconds since the Unix epoch, truncated to `u32` — TTLs are absolute
/// second-granularity deadlines compared against this.
pub fn now_seconds() -> u32 {
    SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |d| d.as_secs() as u32)
}

/// Binds and listens on `config`'s address, with `SO_REUSEADDR` and
/// non-blocking mode set before handing the socket to `tokio`. Public so
/// tests can bind port `0` and read back the OS-assigned port via
/// [`TcpListener::local_addr`].
pub fn bind_listener(config: &ServerConfig) -> Result<TcpListener, DaemonError> {
    let addr = config.socket_addr();
    let socket =
        Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP)).map_err(DaemonError::SocketConfig)?;
    socket.set_reuse_address(true).map_err(DaemonError::SocketConfig)?;
    socket.set_nonblocking(true).map_err(DaemonError::SocketConfig)?;
    socket.bind(&addr.into()).map_err(|source| DaemonError::Bind { addr, source })?;
    socket.listen(config.backlog as i32).map_err(DaemonError::SocketConfig)?;
    let std_listener: std::net::TcpListener = socket.into();
    TcpListener::from_std(std_listener).map_err(DaemonError::SocketConfig)
}

/// Runs the accept loop forever (until the process is signalled to stop).
/// Must be driven from within a `tokio::task::LocalSet` on a
/// `current_thread` runtime — the shared `Table` is not `Send`-shareable
/// across worker threads by design.
pub async fn run(config: ServerConfig) -> Result<(), DaemonError> {
    let listener = bind_listener(&config)?;
    serve(listener, &config).await
}

/// Drives the accept loop over an already-bound listener. Split out from
/// [`run`] so tests can bind an ephemeral port (`:0`), read back the actual
/// [`TcpListener::local_addr`], and talk to the server over a real socket
/// without needing a fixed port.
pub async fn serve(listener: TcpListener, config: &ServerConfig) -> Result<(), DaemonError> {
    logging::on_listening(listener.local_addr().unwrap_or_else(|_| config.socket_addr()));

    let table = Rc::new(RefCell::new(Table::new(config.initial_capacity)));
    let limits = config.limits();
    let read_buffer_max = config.read_buffer_max;
    let local = tokio::task::LocalSet::new();

    local
        .run_until(async move {
            let mut next_id: u64 = 0;
            loop {
                let (stream, peer) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(err) => {
                        tracing::warn!(error = %err, "accept failed, continuing");
                        continue;
                    }
                };
                next_id += 1;
                let id = next_id;
                logging::on_connection_accepted(peer, id);

                let table = Rc::clone(&table);
                tokio::task::spawn_local(async move {
                    serve_connection(id, peer, stream, table, limits, read_buffer_max).await;
                });
            }
        })
        .await;

    Ok(())
}

/// Drives one connection until it closes: alternates draining any pending
/// reply bytes with reading more request bytes, handing each newly readable
/// chunk to [`Connection::process`]. There is no concurrency to manage here
/// — a single request runs lex, aggregate, dispatch, table operation, and
/// reply with no yield points in between.
async fn serve_connection(
    id: u64,
    peer: std::net::SocketAddr,
    mut stream: TcpStream,
    table: Rc<RefCell<Table>>,
    limits: Limits,
    read_buffer_max: usize,
) {
    let mut conn = Connection::new(id, peer);
    let mut chunk = vec![0u8; READ_CHUNK];

    loop {
        while conn.has_pending_write() {
            match stream.write(conn.pending_write()).await {
                Ok(0) => {
                    logging::on_connection_closed(id, "peer closed the connection while writing");
                    return;
                }
                Ok(n) => conn.advance_write(n),
                Err(err) => {
                    logging::on_connection_closed(id, io_close_reason(&err));
                    return;
                }
            }
        }

        if conn.read_buffer_len() >= read_buffer_max {
            logging::on_connection_closed(id, "read buffer exceeded the configured hard max");
            return;
        }

        let n = match stream.read(&mut chunk).await {
            Ok(0) => {
                logging::on_connection_closed(id, "peer closed the connection");
                return;
            }
            Ok(n) => n,
            Err(err) => {
                logging::on_connection_closed(id, io_close_reason(&err));
                return;
            }
        };
        conn.feed(&chunk[..n]);

        let now = now_seconds();
        let must_close = {
            let mut table = table.borrow_mut();
            conn.process(&mut table, &limits, now)
        };
        if must_close {
            // The closing reply (e.g. `-ERR INTERNAL`) is already sitting in
            // the write buffer and must reach the peer before the socket
            // goes away.
            while conn.has_pending_write() {
                match stream.write(conn.pending_write()).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => conn.advance_write(n),
                }
            }
            logging::on_internal_error(id, "index post-condition failure, closing connection");
            return;
        }
    }
}

fn io_close_reason(err: &io::Error) -> &'static str {
    match err.kind() {
        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted => "peer reset the connection",
        io::ErrorKind::BrokenPipe => "broken pipe",
        _ => "i/o error",
    }
}
