
use anyhow::{Context, Result};
use console::style;
use dialoguer::{Confirm, Input, Select};

use super::{Config, ConfigError, IndexBackend, OllamaConfig, VectorIndexConfig};

fn heading(title: &str, blurb: &str) {
    eprintln!();
    eprintln!("{}", style(title).bold().yellow());
    eprintln!("{}", blurb);
    eprintln!();
}

fn setting(label: &str, value: impl std::fmt::Display) {
    eprintln!("  {}: {}", label, style(value).cyan());
}

fn url_setting(url: Result<url::Url, ConfigError>) {
    match url {
        Ok(url) => setting("URL", url),
        Err(e) => eprintln!("  URL: {} ({})", style("Invalid").red(), e),
    }
}

fn report_reachability(service: &str, reachable: bool) {
    if reachable {
        eprintln!("{}", style(format!("✓ {} connection successful!", service)).green());
    } else {
        eprintln!(
            "{}",
            style(format!("⚠ Warning: Could not connect to {}", service)).yellow()
        );
    }
}

#[inline]
pub fn run_interactive_config() -> Result<()> {
    eprintln!("{}", style("🔧 Knowledge Store Configuration Setup").bold().cyan());

    let mut config = load_existing_config()?;

    heading(
        "Ollama Configuration",
        "Configure the Ollama instance used to embed documents and queries.",
    );
    configure_ollama(&mut config.ollama)?;

    heading(
        "Vector Index Configuration",
        "Choose where collections and their embedded chunks are stored.",
    );
    configure_vector_index(&mut config.vector_index)?;

    eprintln!();
    eprintln!("{}", style("Testing configuration...").yellow());
    let ollama_up = config
        .ollama_url()
        .is_ok_and(|url| endpoint_reachable(&format!("{}api/version", url)));
    report_reachability("Ollama", ollama_up);
    if config.vector_index.backend == IndexBackend::Qdrant {
        let qdrant_up = config
            .qdrant_url()
            .is_ok_and(|url| endpoint_reachable(&format!("{}collections", url)));
        report_reachability("Qdrant", qdrant_up);
    }

    eprintln!();
    let save = Confirm::new()
        .with_prompt("Save configuration?")
        .default(true)
        .interact()?;
    if !save {
        eprintln!("Configuration not saved.");
        return Ok(());
    }

    config.save().context("Failed to save configuration")?;
    eprintln!(
        "{} {}",
        style("✓ Configuration saved to").green(),
        style(config.config_file_path().display()).cyan()
    );
    Ok(())
}

#[inline]
pub fn show_config() -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;

    eprintln!("{}", style("📋 Current Configuration").bold().cyan());

    heading("Ollama Settings:", "Embeds documents and queries.");
    url_setting(config.ollama_url());
    setting("Model", &config.ollama.model);
    setting("Batch Size", config.ollama.batch_size);

    heading("Vector Index Settings:", "Stores embedded chunks per collection.");
    setting("Backend", config.vector_index.backend);
    match config.vector_index.backend {
        IndexBackend::Qdrant => url_setting(config.qdrant_url()),
        IndexBackend::Lancedb => setting("Path", config.lancedb_path().display()),
        IndexBackend::Memory => {}
    }

    heading("Store Settings:", "Timeouts, concurrency and search defaults.");
    setting("In Memory", config.is_in_memory());
    setting("Call Timeout (s)", config.store.call_timeout_secs);
    setting("Embedding Concurrency", config.store.embedding_concurrency);
    setting("Default Limit", config.store.default_limit);
    setting(
        "Default Collection",
        config.store.default_collection.as_deref().unwrap_or("(none)"),
    );

    eprintln!();
    eprintln!("Config file: {}", style(config.config_file_path().display()).dim());
    eprintln!("Metadata directory: {}", style(config.metadata_dir().display()).dim());
    Ok(())
}

fn load_existing_config() -> Result<Config> {
    match Config::load() {
        Ok(config) => {
            eprintln!("{}", style("Found existing configuration.").green());
            Ok(config)
        }
        Err(e) => {
            eprintln!(
                "{} ({:#})",
                style("Existing configuration unusable, starting from defaults").yellow(),
                e
            );
            Ok(Config::default())
        }
    }
}

fn prompt_port(prompt: &str, current: u16) -> Result<u16> {
    let port = Input::new()
        .with_prompt(prompt)
        .default(current)
        .validate_with(|input: &u16| {
            if *input == 0 {
                Err("Port must be greater than 0")
            } else {
                Ok(())
            }
        })
        .interact_text()?;
    Ok(port)
}

fn configure_ollama(ollama: &mut OllamaConfig) -> Result<()> {
    let protocols = ["http", "https"];
    let current = protocols
        .iter()
        .position(|p| *p == ollama.protocol)
        .unwrap_or(0);
    let choice = Select::new()
        .with_prompt("Ollama protocol")
        .default(current)
        .items(&protocols)
        .interact()?;
    ollama.set_protocol(protocols[choice].to_string())?;

    let draft = ollama.clone();
    let host: String = Input::new()
        .with_prompt("Ollama host")
        .default(ollama.host.clone())
        .validate_with(|input: &String| {
            OllamaConfig {
                host: input.clone(),
                ..draft.clone()
            }
            .validate()
        })
        .interact_text()?;
    ollama.set_host(host)?;

    let port = prompt_port("Ollama port", ollama.port)?;
    ollama.set_port(port)?;

    let model: String = Input::new()
        .with_prompt("Embedding model")
        .default(ollama.model.clone())
        .validate_with(|input: &String| {
            if input.trim().is_empty() {
                Err("Model name cannot be empty")
            } else {
                Ok(())
            }
        })
        .interact_text()?;
    ollama.set_model(model)?;

    Ok(())
}

fn configure_vector_index(index: &mut VectorIndexConfig) -> Result<()> {
    let choices = [
        (IndexBackend::Qdrant, "qdrant (remote server)"),
        (IndexBackend::Lancedb, "lancedb (embedded, on disk)"),
        (IndexBackend::Memory, "memory (transient, nothing persisted)"),
    ];
    let labels: Vec<&str> = choices.iter().map(|(_, label)| *label).collect();
    let current = choices
        .iter()
        .position(|(backend, _)| *backend == index.backend)
        .unwrap_or(0);

    let selected = Select::new()
        .with_prompt("Vector index backend")
        .default(current)
        .items(&labels)
        .interact()?;
    index.backend = choices[selected].0;

    if index.backend == IndexBackend::Qdrant {
        let host: String = Input::new()
            .with_prompt("Qdrant host")
            .default(index.host.clone())
            .interact_text()?;
        index.set_host(host)?;

        let port = prompt_port("Qdrant port", index.port)?;
        index.set_port(port)?;
    }

    Ok(())
}

/// Any HTTP answer, even a client error, proves the server is reachable
fn endpoint_reachable(url: &str) -> bool {
    let agent: ureq::Agent = ureq::Agent::config_builder()
        .timeout_global(Some(std::time::Duration::from_secs(5)))
        .build()
        .into();

    match agent.get(url).call() {
        Ok(_) => true,
        Err(ureq::Error::StatusCode(code)) => (400..500).contains(&code),
        Err(_) => false,
    }
}
