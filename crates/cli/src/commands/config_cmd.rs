//! `lectern config`: configuration management commands.

use lectern_config::AppConfig;

pub async fn validate() -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Validating configuration...");

    match AppConfig::load() {
        Ok(config) => {
            println!("   ✅ Config parsed successfully");

            let mut warnings = Vec::new();

            if !config.has_api_key() {
                warnings.push("No API key set (set LECTERN_API_KEY or OPENAI_API_KEY)".to_string());
            }

            if config.agent.domain_summary.trim().is_empty() {
                warnings.push("agent.domain_summary is empty; every turn will look out of domain".to_string());
            }

            if config.retrieval.max_fragment_chars == 0 {
                warnings.push("retrieval.max_fragment_chars is 0; fragments will be empty".to_string());
            }

            let corpus = super::corpus_path(None);
            if !corpus.exists() {
                warnings.push(format!("No corpus at {} (run `lectern ingest`)", corpus.display()));
            }

            if warnings.is_empty() {
                println!("   ✅ All checks passed");
            } else {
                println!();
                for w in &warnings {
                    println!("   ⚠️  {w}");
                }
            }

            println!();
            println!("   Endpoint:  {}", config.provider.base_url);
            println!("   Model:     {}", config.provider.model);
            println!(
                "   Sessions:  {} cached, window {}, {} store",
                config.session.cache_capacity, config.session.window_size, config.session.store
            );
            println!(
                "   Retrieval: top {} from \"{}\" ({} dims)",
                config.retrieval.top_k, config.retrieval.collection, config.retrieval.vector_dim
            );
            println!(
                "   Media:     {}",
                config.tools.media_endpoint.as_deref().unwrap_or("disabled")
            );
        }
        Err(e) => {
            println!("   ❌ Config error: {e}");
            return Err(e.into());
        }
    }

    Ok(())
}

pub async fn show() -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    redact(&mut config);
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

pub async fn path() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = AppConfig::config_dir().join("config.toml");
    println!("{}", config_path.display());
    Ok(())
}

fn redact(config: &mut AppConfig) {
    if config.provider.api_key.is_some() {
        config.provider.api_key = Some("***".into());
    }
    if config.tools.media_api_key.is_some() {
        config.tools.media_api_key = Some("***".into());
    }
}
