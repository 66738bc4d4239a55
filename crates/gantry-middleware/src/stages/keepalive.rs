//! Keep-alive stage.
//!
//! A transport option rather than an interceptor: it changes how the server
//! treats connections, not calls.

use crate::catalog::{PipelineUnit, TransportOptions};
use crate::compose::Dependencies;
use gantry_config::{Configuration, KeepAliveSection};
use std::time::Duration;

pub(crate) fn build(config: &Configuration, _deps: &Dependencies) -> Result<PipelineUnit, String> {
    let section = config
        .section::<KeepAliveSection>()
        .map_err(|e| e.to_string())?
        .unwrap_or_default();
    Ok(PipelineUnit::Transport(transport_options(&section)))
}

/// Converts the `[keepalive]` section.
#[must_use]
pub fn transport_options(section: &KeepAliveSection) -> TransportOptions {
    TransportOptions {
        keep_alive: section.enabled,
        idle_timeout: section.idle_timeout_secs.map(Duration::from_secs),
        max_connection_age: section.max_connection_age_secs.map(Duration::from_secs),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_section_to_options() {
        let options = transport_options(&KeepAliveSection {
            enabled: true,
            idle_timeout_secs: Some(30),
            max_connection_age_secs: Some(600),
        });
        assert!(options.keep_alive);
        assert_eq!(options.idle_timeout, Some(Duration::from_secs(30)));
        assert_eq!(options.max_connection_age, Some(Duration::from_secs(600)));
    }

    #[test]
    fn test_defaults_match_plain_transport() {
        assert_eq!(
            transport_options(&KeepAliveSection::default()),
            TransportOptions::default()
        );
    }
}
