use tokio::net::TcpListener;

/// Standalone users API for poking at the client by hand.
#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    let host = std::env::var("MOCK_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port = std::env::var("PORT").unwrap_or_else(|_| "3000".to_string());
    let listener = TcpListener::bind(format!("{host}:{port}")).await?;
    println!("users API listening on http://{}", listener.local_addr()?);
    mock_server::run(listener).await
}
