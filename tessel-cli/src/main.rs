//! Tessel: run a greedy generation loop from the command line.
//!
//! The forward pass comes from the reference engine, which replays a token
//! script while checking every feed, so the full prompt → tokens → text path
//! can be exercised against a real tokenizer and model config.

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tessel_backend_cpu::{DeviceLedger, ReferenceEngine};
use tessel_cli::chat_template::{ChatTemplate, DEFAULT_SYSTEM_PROMPT};
use tessel_cli::stream::WriterSink;
use tessel_cli::tokenizer::HfTokenizer;
use tessel_core::GenerationParams;
use tessel_loader::ConfigFile;
use tessel_runtime::GreedyDecoder;

#[derive(Parser)]
#[command(name = "tessel", about = "Tessel greedy generation driver")]
struct Cli {
    /// Model directory holding config.json and tokenizer.json
    #[arg(long)]
    model_path: PathBuf,

    /// User message to answer
    #[arg(long)]
    prompt: String,

    /// System message placed before the user turn
    #[arg(long, default_value = DEFAULT_SYSTEM_PROMPT)]
    system: String,

    /// Stop once the fed sequence reaches this many tokens
    #[arg(long, default_value = "4096")]
    max_output_tokens: usize,

    /// Token ids the reference engine selects on successive steps
    #[arg(long, value_delimiter = ',')]
    replay: Vec<u32>,

    /// Keep present key/value tensors in simulated device memory
    #[arg(long)]
    device_cache: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // --- Load config ---
    let config_file = ConfigFile::from_model_dir(&cli.model_path)?;
    let model_config = config_file.to_model_config()?;
    info!(
        "Model config: {} layers, {} heads, {} KV heads, head_dim {}, eos {}",
        model_config.num_hidden_layers,
        model_config.num_attention_heads,
        model_config.num_key_value_heads,
        model_config.head_dim(),
        model_config.eos_token_id,
    );

    // --- Load tokenizer and chat template ---
    let tokenizer = HfTokenizer::from_model_dir(&cli.model_path)?;
    let vocab_size = config_file
        .vocab_size
        .unwrap_or_else(|| tokenizer.vocab_size());
    info!("Tokenizer loaded (vocab {vocab_size})");
    let template = ChatTemplate::from_model_dir(&cli.model_path)?;
    let prompt = template.prompt(&cli.system, &cli.prompt)?;

    // --- Engine ---
    let ledger = DeviceLedger::new();
    let mut engine =
        ReferenceEngine::new(model_config.clone(), vocab_size).with_tokens(cli.replay.clone());
    if cli.device_cache {
        engine = engine.on_device(ledger.clone());
    }

    let mut decoder = GreedyDecoder::new(engine, tokenizer, model_config).with_params(
        GenerationParams {
            max_output_tokens: cli.max_output_tokens,
        },
    );

    let mut sink = WriterSink::new(std::io::stdout().lock());
    let output = decoder.generate(&prompt, &mut sink)?;
    sink.finish(&output.text);
    drop(sink);
    println!();

    info!(
        "Generated {} tokens in {} steps ({:?})",
        output.generated().len(),
        output.steps,
        output.finish_reason,
    );
    if cli.device_cache {
        info!(
            "Device buffers: {} allocated, {} live",
            ledger.allocated(),
            ledger.live()
        );
    }

    Ok(())
}
