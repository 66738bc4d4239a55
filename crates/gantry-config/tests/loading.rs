//! Loading whole service documents from disk.

use gantry_config::{AccessLogSection, ConfigLoader, Configuration, MetricsSection};
use proptest::prelude::*;
use std::io::Write;
use std::path::PathBuf;

const GREETER: &str = r#"
appname = "srv-greeter"
listen = ":9090"
debug = true
registryListen = "10.1.2.3:9090"

[db.default]
dialect = "memory"
dsn = "greeter"

[log.access]
path = "/var/log/greeter/access.log"
methods = ["/helloworld.Greeter/SayHello"]

[metrics]
"#;

#[test]
fn test_greeter_document_from_file() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    file.write_all(GREETER.as_bytes()).unwrap();

    let config = ConfigLoader::new()
        .with_defaults()
        .with_file(file.path())
        .unwrap()
        .load()
        .unwrap();

    let settings = config.settings().unwrap();
    assert_eq!(settings.appname, "srv-greeter");
    assert!(settings.debug);
    assert_eq!(settings.registry_listen.as_deref(), Some("10.1.2.3:9090"));

    let access = config.section::<AccessLogSection>().unwrap().unwrap();
    assert_eq!(access.path, PathBuf::from("/var/log/greeter/access.log"));
    assert_eq!(access.methods.unwrap().len(), 1);

    let metrics = config.section::<MetricsSection>().unwrap().unwrap();
    assert_eq!(metrics.namespace, "gantry");

    assert_eq!(
        config.table("db.default").unwrap().get("dsn").unwrap(),
        "greeter"
    );
}

#[test]
fn test_env_overrides_after_file() {
    let config = ConfigLoader::new()
        .with_string(GREETER, "toml")
        .unwrap()
        .with_overrides(
            "GANTRY",
            [
                ("GANTRY__LISTEN", "127.0.0.1:0"),
                ("GANTRY__DEBUG", "false"),
                ("GANTRY__LOG__ACCESS__PATH", "/tmp/x.log"),
            ],
        )
        .unwrap()
        .load()
        .unwrap();

    let settings = config.settings().unwrap();
    assert_eq!(settings.listen, "127.0.0.1:0");
    assert!(!settings.debug);
    assert_eq!(config.get_str("log.access.path"), Some("/tmp/x.log"));
}

#[test]
fn test_json_and_toml_agree() {
    let toml = Configuration::from_toml(GREETER).unwrap();
    let json = Configuration::from_json(&serde_json::to_string(toml.as_map()).unwrap()).unwrap();
    assert_eq!(toml, json);
}

proptest! {
    #[test]
    fn prop_dotted_lookup_finds_nested_string(
        keys in proptest::collection::vec("[a-z][a-z0-9_]{0,8}", 1..5),
        value in "[ -~]{0,20}",
    ) {
        let mut nested = serde_json::Value::String(value.clone());
        for key in keys.iter().rev() {
            let mut map = serde_json::Map::new();
            map.insert(key.clone(), nested);
            nested = serde_json::Value::Object(map);
        }
        let config = Configuration::from_value(nested).unwrap();
        prop_assert_eq!(config.get_str(&keys.join(".")), Some(value.as_str()));
    }
}
