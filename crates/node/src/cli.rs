//! Interactive command-line driver: a thin shell over the cluster API.

use gossipkv_cluster::Cluster;
use gossipkv_common::NodeId;
use gossipkv_engine::PutOutcome;
use gossipkv_wire::TcpTransport;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

pub async fn run(cluster: Arc<Cluster<TcpTransport>>) -> std::io::Result<()> {
    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();
    let mut stdout = tokio::io::stdout();

    println!("Welcome to the gossipkv CLI!");
    println!("-----------------------------");

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let args: Vec<&str> = line.split_whitespace().collect();

        match args.as_slice() {
            ["put", key, value] => match cluster.put(key, value).await {
                Ok(PutOutcome::Stored { clock }) => {
                    println!("OK, VectorClock: {:?}", clock.entries());
                }
                Ok(PutOutcome::Hinted { target }) => {
                    println!("Accepted; owner {} is down, write buffered as hint.", target);
                }
                Err(e) => println!("put failed: {}", e),
            },
            ["put", ..] => println!("Usage: put <key> <value>"),

            ["get", key] => match cluster.get(key).await {
                Ok(Some(lookup)) => match lookup.clock {
                    Some(clock) => {
                        println!("Value: {}, VectorClock: {:?}", lookup.value, clock.entries());
                    }
                    None => println!("Value: {} (disk fallback, no clock)", lookup.value),
                },
                Ok(None) => println!("Key not found."),
                Err(e) => println!("get failed: {}", e),
            },
            ["get", ..] => println!("Usage: get <key>"),

            ["delete", key] => match cluster.delete(key).await {
                Ok(_) => println!("Deleted."),
                Err(e) => println!("delete failed: {}", e),
            },
            ["delete", ..] => println!("Usage: delete <key>"),

            ["nodes"] => print_nodes(&cluster),

            ["exit"] => {
                println!("Exiting...");
                break;
            }

            [] => {}
            _ => println!("Unknown command. Available commands: put, get, delete, nodes, exit"),
        }
    }
    Ok(())
}

fn print_nodes(cluster: &Cluster<TcpTransport>) {
    let coordinator = cluster.coordinator();
    let mark = |id: &NodeId| {
        if coordinator.as_ref() == Some(id) {
            " [coordinator]"
        } else {
            ""
        }
    };

    println!(
        "{} @ {} (self, alive){}",
        cluster.local_id(),
        cluster.local_addr(),
        mark(cluster.local_id())
    );
    for peer in cluster.nodes() {
        let status = if peer.alive { "alive" } else { "dead" };
        println!("{} @ {} ({}){}", peer.id, peer.addr, status, mark(&peer.id));
    }
}
