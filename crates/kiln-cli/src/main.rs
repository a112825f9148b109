use clap::Parser;
use std::time::Instant;

use kiln_core::{Device, DeviceKind, Tensor};
use kiln_ops::{
    global_registry, ExecutorConfig, GradientEntry, Graph, GraphDef, OperatorDef, Workspace,
};

const BANNER: &str = r#"
 _  _____ _     _   _
| |/ /_ _| |   | \ | |
| ' / | || |   |  \| |
| . \ | || |___| |\  |
|_|\_\___|_____|_| \_|"#;

#[derive(Parser)]
#[command(
    name = "kiln",
    about = "Kiln operator framework CLI",
    long_about = "Declare an operator once, run it on every element type and device.\n\nLists the registered operators and runs a small demo graph on the CPU or a CUDA device.",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Show build and device info
    Info,
    /// List registered operators with their schemas and deployments
    Ops,
    /// Run a Copy -> Accuracy / OneHot graph on synthetic data
    Demo {
        /// Device: cpu, cuda, cuda:N (defaults to KILN_DEVICE or cpu)
        #[arg(long)]
        device: Option<String>,
        /// Number of examples
        #[arg(long, default_value = "8")]
        batch: usize,
        /// Number of classes
        #[arg(long, default_value = "4")]
        classes: usize,
        /// Rank cutoff for the accuracy metric
        #[arg(long, default_value = "1")]
        top_k: i64,
        /// Synchronize the device after every operator
        #[arg(long)]
        sync: bool,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Info => cmd_info(),
        Commands::Ops => cmd_ops(),
        Commands::Demo { device, batch, classes, top_k, sync } => {
            cmd_demo(device.as_deref(), batch, classes, top_k, sync)
        }
    };
    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn cmd_info() -> kiln_ops::Result<()> {
    println!("{}", BANNER);
    println!("  v{}  -  typed, multi-device operators\n", env!("CARGO_PKG_VERSION"));

    println!("Platform");
    println!("  OS:   {}", std::env::consts::OS);
    println!("  Arch: {}", std::env::consts::ARCH);
    println!("  CPU threads: {}", std::thread::available_parallelism().map_or(1, |n| n.get()));

    println!("\nCUDA");
    #[cfg(feature = "cuda")]
    {
        let count = kiln_kernels::cuda::device_count();
        println!("  compiled: [x]");
        println!("  devices:  {}", count);
    }
    #[cfg(not(feature = "cuda"))]
    println!("  compiled: [ ]  (rebuild with --features cuda)");

    println!("\nDTypes");
    println!("  float: f16, f32, f64");
    println!("  int:   u8, i32, i64");

    let config = ExecutorConfig::from_env()?;
    println!("\nExecutor (from environment)");
    println!("  device:             {}", config.device);
    println!("  sync_after_each_op: {}", config.sync_after_each_op);
    Ok(())
}

fn cmd_ops() -> kiln_ops::Result<()> {
    let registry = global_registry()?;
    println!(
        "{:<10} {:>8} {:>8} {:<10} {:<10} Description",
        "Op", "Inputs", "Outputs", "Devices", "Gradient"
    );
    println!("{}", "-".repeat(90));
    for name in registry.op_types() {
        let Some(schema) = registry.schema(name) else { continue };
        let devices: Vec<String> = registry
            .deployed_kinds(name)
            .into_iter()
            .map(|k: DeviceKind| k.to_string())
            .collect();
        let gradient = match registry.gradient(name) {
            Some(GradientEntry::None) => "none".to_string(),
            Some(GradientEntry::Op(op)) => op.clone(),
            None => "-".to_string(),
        };
        println!(
            "{:<10} {:>8} {:>8} {:<10} {:<10} {}",
            name,
            fmt_arity(schema.inputs()),
            fmt_arity(schema.outputs()),
            devices.join(","),
            gradient,
            schema.doc_str().unwrap_or("")
        );
    }
    Ok(())
}

fn fmt_arity((min, max): (usize, usize)) -> String {
    if min == max {
        min.to_string()
    } else if max == usize::MAX {
        format!("{min}+")
    } else {
        format!("{min}-{max}")
    }
}

fn cmd_demo(device: Option<&str>, batch: usize, classes: usize, top_k: i64, sync: bool) -> kiln_ops::Result<()> {
    let mut config = ExecutorConfig::from_env()?;
    if let Some(device) = device {
        config.device = device.parse::<Device>()?;
    }
    if sync {
        config.sync_after_each_op = true;
    }

    let def = GraphDef::new("demo")
        .push(OperatorDef::new("Copy", ["logits"], ["scores"]).with_name("copy_logits"))
        .push(
            OperatorDef::new("Accuracy", ["scores", "labels"], ["accuracy", "per_class"])
                .with_name("accuracy")
                .with_arg("top_k", top_k),
        )
        .push(
            OperatorDef::new("OneHot", ["labels"], ["onehot"])
                .with_name("encode_labels")
                .with_arg("depth", classes as i64),
        );
    let mut graph = Graph::build(def, global_registry()?, config.clone())?;

    let logits: Vec<f32> = (0..batch * classes)
        .map(|i| ((i * 37 + 11) % 97) as f32 / 97.0)
        .collect();
    let labels: Vec<f32> = (0..batch).map(|i| ((i * 3 + 1) % classes) as f32).collect();

    let mut ws = Workspace::new();
    ws.feed("logits", Tensor::from_f32(&logits, &[batch, classes]));
    ws.feed("labels", Tensor::from_f32(&labels, &[batch]));

    let start = Instant::now();
    graph.run(&mut ws)?;
    let elapsed = start.elapsed();

    println!("=== Kiln demo ({} ops on {}) ===\n", graph.len(), config.device);
    let fetch = |name: &str| -> kiln_ops::Result<Vec<f32>> {
        match ws.fetch(name) {
            Some(t) => Ok(t.to_vec::<f32>()?),
            None => Err(kiln_ops::Error::MissingInput {
                op: "demo".into(),
                what: format!("workspace tensor `{name}`"),
            }),
        }
    };
    println!("accuracy@{top_k}: {:.4}", fetch("accuracy")?[0]);
    for (c, acc) in fetch("per_class")?.iter().enumerate() {
        println!("  class {c}: {acc:.4}");
    }
    let onehot = fetch("onehot")?;
    println!("\nonehot (first {} rows):", batch.min(4));
    for row in onehot.chunks(classes).take(4) {
        let cells: Vec<String> = row.iter().map(|v| format!("{v:.0}")).collect();
        println!("  [{}]", cells.join(", "));
    }
    println!("\nelapsed: {:.1} us", elapsed.as_secs_f64() * 1e6);
    Ok(())
}
