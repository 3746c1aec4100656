use std::path::Path;

use anyhow::Context;
use orbital::HostConfig;

/// Reads a JSON host config; missing fields keep their defaults.
pub fn load(path: Option<&Path>) -> anyhow::Result<HostConfig> {
    let Some(path) = path else {
        return Ok(HostConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let config = serde_json::from_str(&text)
        .with_context(|| format!("parsing config {}", path.display()))?;
    log::info!("Loaded config from {}", path.display());
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use orbital::LevelChoice;

    #[test]
    fn partial_json_keeps_defaults() {
        let config: HostConfig =
            serde_json::from_str(r#"{ "port": 4000, "level": "waves", "seed": 7 }"#).unwrap();
        assert_eq!(config.port, 4000);
        assert_eq!(config.level, LevelChoice::Waves);
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.peer_timeout_ms, 15_000);
        assert_eq!(config.max_packet_size, orbital::MAX_PACKET_SIZE);
    }

    #[test]
    fn missing_path_means_defaults() {
        let config = load(None).unwrap();
        assert_eq!(config.port, orbital::DEFAULT_PORT);
    }
}
