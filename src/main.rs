#[tokio::main]
async fn main() {
    if let Err(err) = paper_host_lib::run().await {
        eprintln!("paper-host: {err}");
        std::process::exit(1);
    }
}
