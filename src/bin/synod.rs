#[macro_use]
extern crate log;

use bytes::Bytes;
use std::{env::args, net::SocketAddr, net::TcpListener, process::exit, sync::Arc};
use synod::{
    serve, Acceptor, AcceptorConfig, HttpTransport, Learner, LearnerConfig, NodeId, Proposer,
    ProposerConfig, Receiver,
};

const USAGE: &str = "usage:
    synod acceptor <address> [learner-address...]
    synod learner <address> <acceptor-address...>
    synod propose <identity> <value> <acceptor-address...>";

fn usage() -> ! {
    eprintln!("{}", USAGE);
    exit(1);
}

fn parse<T: std::str::FromStr>(arg: Option<String>, what: &str) -> T {
    let arg = match arg {
        Some(arg) => arg,
        None => {
            error!("Missing {}", what);
            usage();
        }
    };
    match arg.parse() {
        Ok(v) => v,
        Err(_) => {
            error!("Invalid {}: {}", what, arg);
            usage();
        }
    }
}

fn parse_all<T: std::str::FromStr>(args: impl Iterator<Item = String>, what: &str) -> Vec<T> {
    args.map(|arg| parse(Some(arg), what)).collect()
}

/// Binds `address` and serves `receiver` until the server fails.
async fn run_server(address: SocketAddr, receiver: Arc<dyn Receiver>) {
    let listener = match TcpListener::bind(address) {
        Ok(listener) => listener,
        Err(e) => {
            error!("Unable to bind {}: {}", address, e);
            exit(1);
        }
    };
    let server = match serve(listener, receiver) {
        Ok(server) => server,
        Err(e) => {
            error!("Unable to serve on {}: {}", address, e);
            exit(1);
        }
    };
    if let Err(e) = server.wait().await {
        error!("server error: {}", e);
        exit(1);
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let mut args = args().skip(1);
    match args.next().as_deref() {
        Some("acceptor") => {
            let address: SocketAddr = parse(args.next(), "acceptor address");
            let learners: Vec<SocketAddr> = parse_all(args, "learner address");
            let acceptor = match Acceptor::new(
                AcceptorConfig::new(address, learners),
                HttpTransport::default(),
            ) {
                Ok(acceptor) => acceptor,
                Err(e) => {
                    error!("{}", e);
                    exit(1);
                }
            };
            run_server(address, Arc::new(acceptor)).await;
        }
        Some("learner") => {
            let address: SocketAddr = parse(args.next(), "learner address");
            let acceptors: Vec<SocketAddr> = parse_all(args, "acceptor address");
            let learner = match Learner::new(LearnerConfig::new(address, acceptors)) {
                Ok(learner) => Arc::new(learner),
                Err(e) => {
                    error!("{}", e);
                    exit(1);
                }
            };

            let watcher = learner.clone();
            tokio::spawn(async move {
                let value = watcher.wait_chosen().await;
                info!("Chosen value: {}", String::from_utf8_lossy(&value));
            });
            run_server(address, learner).await;
        }
        Some("propose") => {
            let identity: NodeId = parse(args.next(), "proposer identity");
            let value: String = parse(args.next(), "value");
            let acceptors: Vec<SocketAddr> = parse_all(args, "acceptor address");

            let config = ProposerConfig::new(identity, acceptors);
            let mut proposer = match Proposer::new(config, HttpTransport::default()) {
                Ok(proposer) => proposer,
                Err(e) => {
                    error!("{}", e);
                    exit(1);
                }
            };
            let decided = proposer.propose(Bytes::from(value)).await;
            println!("{}", String::from_utf8_lossy(&decided));
        }
        _ => usage(),
    }
}
