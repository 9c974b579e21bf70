#[tokio::main]
async fn main() {
    linkpage::start_server().await;
}
