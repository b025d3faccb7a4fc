// src/main.rs - One-shot command line front end for the motion stage
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use wellhost_rs::config::{self, Config};
use wellhost_rs::hardware::mock::MockConnector;
use wellhost_rs::hardware::serial::discover_port;
use wellhost_rs::hardware::{Connector, SerialConnector};
use wellhost_rs::motion::controller::DEFAULT_BATCH_SIZE;
use wellhost_rs::motion::{CompletionOutcome, MotionController};

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Wellhost CLI
#[derive(Parser, Debug)]
#[command(name = "wellhost", version, about = "Drive a GRBL motion stage over serial.")]
struct Cli {
    /// Path to the TOML config file
    #[arg(short, long, default_value = "wellhost.toml")]
    config: PathBuf,

    /// Machine model (overrides [serial] machine)
    #[arg(short, long)]
    machine: Option<String>,

    /// Serial port (overrides [serial] port; auto-detected when neither is set)
    #[arg(short, long)]
    port: Option<String>,

    /// Talk to simulated firmware instead of a serial port
    #[arg(long)]
    dry_run: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print machine position and homing state
    Status,
    /// Run the homing cycle
    Home,
    /// Send a soft reset
    Reset,
    /// Clear an alarm lock without homing
    Unlock,
    /// Rapid move to logical coordinates
    Move {
        #[arg(long, allow_negative_numbers = true)]
        x: f64,
        #[arg(long, allow_negative_numbers = true)]
        y: f64,
        #[arg(long, allow_negative_numbers = true)]
        z: Option<f64>,
    },
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { tracing::Level::DEBUG } else { tracing::Level::INFO })
        .init();

    let mut config = config::load_config(&cli.config).map_err(|e| {
        tracing::error!("Please ensure {} exists and is properly formatted", cli.config.display());
        Box::new(e) as BoxError
    })?;
    if let Some(machine) = &cli.machine {
        config.serial.machine = Some(machine.clone());
    }

    let mut controller = build_controller(&cli, &config).await?;
    if let Err(e) = run(&mut controller, &cli.command).await {
        tracing::error!("{}", e);
        return Err(e);
    }
    Ok(())
}

async fn build_controller(cli: &Cli, config: &Config) -> Result<MotionController, BoxError> {
    let (name, machine) = config.selected_machine()?;
    tracing::info!("Machine: {} @ {} baud", name, machine.baud_rate);

    let connector: Box<dyn Connector> = if cli.dry_run {
        tracing::info!("Dry run: using simulated firmware");
        Box::new(MockConnector::new())
    } else {
        let port = match cli.port.clone().or_else(|| config.serial.port.clone()) {
            Some(port) => port,
            None => {
                discover_port(machine.baud_rate, config.timing.wake_settle(), config.timing.read_timeout())
                    .await?
            }
        };
        Box::new(SerialConnector::new(port, machine.baud_rate, config.timing.read_timeout()))
    };
    Ok(MotionController::new(connector, machine.clone(), config.timing.clone()))
}

async fn run(controller: &mut MotionController, command: &Commands) -> Result<(), BoxError> {
    match command {
        Commands::Status => {
            let homed = controller.is_homed().await;
            match controller.read_position().await? {
                Some(p) => println!("Position: X={:.3} Y={:.3} Z={:.3}", p.x, p.y, p.z),
                None => println!("Position: unknown"),
            }
            println!("Homed: {}", if homed { "yes" } else { "no" });
        }
        Commands::Home => match controller.home().await? {
            CompletionOutcome::Confirmed { polls } => println!("Homed ({} status polls)", polls),
            CompletionOutcome::Assumed { polls } => {
                println!("Homing assumed complete after {} polls; verify the machine before moving", polls)
            }
        },
        Commands::Reset => {
            controller.soft_reset().await?;
            println!("Reset sent");
        }
        Commands::Unlock => {
            let reply = controller.unlock().await?;
            println!("Unlock reply: {}", if reply.is_empty() { "(none)" } else { reply.as_str() });
        }
        Commands::Move { x, y, z } => {
            controller.clear_queue();
            controller.move_to_point(*x, *y)?;
            if let Some(z) = z {
                controller.move_to_height(*z)?;
            }
            let report = controller.execute_queue(DEFAULT_BATCH_SIZE).await?;
            controller.clear_queue();
            if report.all_confirmed() {
                println!("Move complete");
            } else {
                println!("Move sent; completion assumed, not confirmed");
            }
            match controller.read_position().await? {
                Some(p) => println!("Position: X={:.3} Y={:.3} Z={:.3}", p.x, p.y, p.z),
                None => println!("Could not read final position"),
            }
        }
    }
    Ok(())
}
