//! Echo demo for the dsock engine: a server that echoes every chunk back to
//! its sender, and a one-shot client that prints the echoed reply.

use std::collections::HashMap;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use dsock::{DelegateQueue, ReadData, Socket, SocketDelegate, SocketError, SocketId, Tag};

#[derive(Parser)]
#[command(name = "dsock-echo", about = "Echo server/client demo for the dsock engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Listen on a port and echo every received chunk back to its sender
    Serve {
        #[arg(long, default_value_t = 4444)]
        port: u16,
    },
    /// Send a message and print the echoed reply
    Send {
        #[arg(long, default_value = "localhost")]
        host: String,
        #[arg(long, default_value_t = 4444)]
        port: u16,
        message: String,
    },
}

struct EchoServer {
    peers: Mutex<HashMap<SocketId, Socket>>,
}

impl SocketDelegate for EchoServer {
    fn on_accept(&self, _listener: &Socket, peer: Socket) {
        log::info!("accepted connection {}", peer.id());
        peer.read(0);
        self.peers.lock().unwrap().insert(peer.id(), peer);
    }

    fn on_read(&self, socket: &Socket, data: ReadData, _tag: Tag) {
        socket.write(data.bytes().to_vec(), 0);
        socket.read(0);
    }

    fn on_close(&self, socket: &Socket, error: Option<SocketError>) {
        match error {
            Some(err) => log::warn!("connection {} closed: {err}", socket.id()),
            None => log::info!("connection {} closed", socket.id()),
        }
        self.peers.lock().unwrap().remove(&socket.id());
    }
}

struct EchoClient {
    message: Vec<u8>,
    done: mpsc::Sender<Result<Vec<u8>>>,
}

impl SocketDelegate for EchoClient {
    fn on_connect(&self, socket: &Socket, host: &str, port: u16) {
        log::info!("connected to {host}:{port}");
        socket.write(self.message.clone(), 0);
        socket.read_exact(self.message.len(), 1);
    }

    fn on_read(&self, socket: &Socket, data: ReadData, _tag: Tag) {
        self.done.send(Ok(data.bytes().to_vec())).ok();
        socket.disconnect();
    }

    fn on_close(&self, _socket: &Socket, error: Option<SocketError>) {
        if let Some(err) = error {
            self.done.send(Err(err.into())).ok();
        }
    }
}

fn serve(port: u16) -> Result<()> {
    let queue = DelegateQueue::new("dsock-echo");
    let delegate = Arc::new(EchoServer {
        peers: Mutex::new(HashMap::new()),
    });
    let listener = Socket::new(&delegate, &queue);
    listener.listen(port)?;
    if let Some(addr) = listener.local_addr() {
        log::info!("echo server listening on {addr}");
    }
    loop {
        std::thread::park();
    }
}

fn send(host: &str, port: u16, message: &str) -> Result<()> {
    let queue = DelegateQueue::new("dsock-echo");
    let (done_tx, done_rx) = mpsc::channel();
    let delegate = Arc::new(EchoClient {
        message: message.as_bytes().to_vec(),
        done: done_tx,
    });
    let client = Socket::new(&delegate, &queue);
    client.connect(host, port)?;
    let reply = done_rx.recv_timeout(Duration::from_secs(10))??;
    println!("{}", String::from_utf8_lossy(&reply));
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    match cli.command {
        Command::Serve { port } => serve(port),
        Command::Send {
            host,
            port,
            message,
        } => send(&host, port, &message),
    }
}
