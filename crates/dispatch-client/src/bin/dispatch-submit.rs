use clap::Parser;
use dispatch_client::Client;
use dispatch_types::Job;

/// Submit a single job to a running dispatch server and print the result.
#[derive(Parser)]
struct Args {
    /// Base URL of the dispatch server, e.g. http://localhost:3402
    #[arg(long, default_value = "http://localhost:3402")]
    server: String,

    /// Don't wait for completion; enqueue and exit.
    #[arg(long)]
    async_submit: bool,

    /// Timeout in seconds; 0 means the server default (600s).
    #[arg(long, default_value_t = 0)]
    timeout_secs: i64,

    /// The command to run, e.g. `-- echo hello`.
    #[arg(last = true, required = true)]
    cmd: Vec<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let mut job = Job::new(args.cmd);
    job.timeout_ns = args.timeout_secs.saturating_mul(1_000_000_000);

    let client = Client::new(args.server);

    let result = if args.async_submit {
        match client.submit_async(&job).await {
            Ok(id) => {
                println!("{{\"Id\":\"{id}\"}}");
                return;
            }
            Err(err) => Err(err),
        }
    } else {
        client.run(&job).await
    };

    match result {
        Ok(job) => {
            let json = serde_json::to_string_pretty(&job).expect("job serializes to json");
            println!("{json}");
        }
        Err(err) => {
            eprintln!("dispatch-submit: {err}");
            std::process::exit(1);
        }
    }
}
