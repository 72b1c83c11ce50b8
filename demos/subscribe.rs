//! Subscribe to a subject and print whatever arrives.
//!
//! Run a local server (`nats-server`) and then:
//!
//! ```sh
//! cargo run --example subscribe -- 'greet.*'
//! ```

use std::time::Duration;

use gnat::{ConnectOpts, FetchError, Kind, Subscriber};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subject = std::env::args().nth(1).unwrap_or_else(|| ">".to_string());

    let mut sub = Subscriber::connect(ConnectOpts::new("127.0.0.1", 4222).with_name("gnat-subscribe")).await?;
    println!(
        "connected to {} ({})",
        sub.server_info().server_id,
        sub.server_info().version
    );

    sub.subscribe(&subject, None, "1").await?;
    println!("subscribed to {subject:?}");

    loop {
        match sub.fetch(Duration::from_secs(30)).await {
            Ok(msg) => {
                match msg.kind() {
                    Kind::Msg | Kind::HMsg => {
                        println!(
                            "[{}] {}",
                            String::from_utf8_lossy(msg.subject().unwrap_or_default()),
                            String::from_utf8_lossy(msg.payload().unwrap_or_default()),
                        );
                        if let Ok(fields) = msg.headers().iter() {
                            for (name, value) in fields {
                                println!(
                                    "    {}: {}",
                                    String::from_utf8_lossy(name),
                                    String::from_utf8_lossy(value)
                                );
                            }
                        }
                    }
                    Kind::Err => {
                        eprintln!("server error: {}", String::from_utf8_lossy(msg.args().unwrap_or_default()));
                    }
                    other => println!("({other:?})"),
                }
                sub.reuse(msg);
            }
            Err(FetchError::Timeout) => continue,
            Err(e) => {
                eprintln!("{e}");
                break;
            }
        }
    }

    sub.disconnect().await;
    Ok(())
}
