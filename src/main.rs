#[tokio::main]
async fn main() {
    std::process::exit(partq::app::startup::startup().await);
}
