//! Publish a message, optionally with headers.
//!
//! ```sh
//! cargo run --example publish -- greet.joe 'hello there'
//! ```

use gnat::{ConnectOpts, Headers, Subscriber};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let subject = args.next().unwrap_or_else(|| "greet.demo".to_string());
    let body = args.next().unwrap_or_else(|| "hello".to_string());

    let mut sub = Subscriber::connect(ConnectOpts::new("127.0.0.1", 4222).with_name("gnat-publish")).await?;

    sub.publish(&subject, None, body.as_bytes()).await?;

    let mut headers = Headers::new();
    headers.append("Content-Type", "text/plain")?;
    sub.publish_with_headers(&subject, None, &headers, body.as_bytes()).await?;

    println!("published {body:?} on {subject:?} (plain and with headers)");

    sub.disconnect().await;
    Ok(())
}
