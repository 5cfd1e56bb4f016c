use anyhow::{Context as _, Result, anyhow};
use chayns_client::{ClientConfig, LifecycleEvent, WebSocketClient};
use clap::{Arg, ArgAction, ArgMatches, Command};
use serde_json::Value;
use strum::IntoEnumIterator as _;

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("chayns-ws")
        .version("0.1.0")
        .about("Reconnecting chayns websocket client")
        .arg(
            Arg::new("application")
                .long("application")
                .short('a')
                .required(true)
                .help("Application name sent with the registration"),
        )
        .arg(
            Arg::new("conditions")
                .long("conditions")
                .short('c')
                .default_value("{}")
                .help("Registration conditions as JSON"),
        )
        .arg(
            Arg::new("url")
                .long("url")
                .short('u')
                .help("Endpoint url, overrides config and environment"),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .help("Path to a TOML config file"),
        )
        .arg(
            Arg::new("listen")
                .long("listen")
                .short('l')
                .action(ArgAction::Append)
                .help("Print messages received on this topic"),
        )
        .arg(
            Arg::new("send")
                .long("send")
                .short('s')
                .action(ArgAction::Append)
                .value_name("TOPIC=JSON")
                .help("Send a message once the client is registered"),
        )
        .arg(
            Arg::new("no-reconnect")
                .long("no-reconnect")
                .action(ArgAction::SetTrue)
                .help("Do not reconnect after the connection is lost"),
        )
        .arg(
            Arg::new("config-check")
                .long("config-check")
                .action(ArgAction::SetTrue)
                .help("Check configuration and exit"),
        )
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .action(ArgAction::Count)
                .help("Set verbose output level"),
        )
        .get_matches();

    let log_level = match matches.get_count("verbose") {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    chayns_client::setup(Some(log_level));

    let config = load_config(&matches)?;
    if matches.get_flag("config-check") {
        log::info!("Configuration OK, endpoint {}", config.endpoint_url);
        return Ok(());
    }

    run(&matches, config).await
}

fn load_config(matches: &ArgMatches) -> Result<ClientConfig> {
    // flags win over the file and the environment
    let mut config = match matches.get_one::<String>("config") {
        Some(path) => ClientConfig::from_file(path)?,
        None => ClientConfig::default(),
    }
    .apply_env();

    if let Some(url) = matches.get_one::<String>("url") {
        config.endpoint_url.clone_from(url);
    }
    if matches.get_flag("no-reconnect") {
        config.auto_reconnect = false;
    }

    config.validate()?;
    Ok(config)
}

fn parse_message(raw: &str) -> Result<(String, Value)> {
    let (topic, data) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("Expected TOPIC=JSON, got '{raw}'"))?;
    if topic.is_empty() {
        return Err(anyhow!("Empty topic in '{raw}'"));
    }
    let data = serde_json::from_str(data).with_context(|| format!("Invalid JSON for '{topic}'"))?;
    Ok((topic.to_owned(), data))
}

/// Log every lifecycle event; without auto reconnect the first `OFFLINE` ends the client
fn watch_lifecycle(client: &WebSocketClient, exit_when_offline: bool) {
    for event in LifecycleEvent::iter() {
        let topic = event.as_ref().to_owned();
        let handle = client.clone();
        client.add_listener(topic.clone(), move |data: &Value| {
            log::info!("[{topic}] {data}");
            if exit_when_offline && event == LifecycleEvent::Offline {
                log::info!("Connection lost and reconnect disabled, closing");
                handle.close();
            }
        });
    }
}

async fn run(matches: &ArgMatches, config: ClientConfig) -> Result<()> {
    let application = matches
        .get_one::<String>("application")
        .ok_or_else(|| anyhow!("--application is required"))?;
    let conditions: Value = matches
        .get_one::<String>("conditions")
        .map(|raw| serde_json::from_str(raw))
        .transpose()
        .context("Invalid --conditions JSON")?
        .unwrap_or(Value::Null);

    let outgoing = matches
        .get_many::<String>("send")
        .into_iter()
        .flatten()
        .map(|raw| parse_message(raw))
        .collect::<Result<Vec<_>>>()?;

    log::info!("Starting chayns-ws for '{application}'...");
    let exit_when_offline = !config.auto_reconnect;
    let client = WebSocketClient::new(application.as_str(), conditions, config);
    watch_lifecycle(&client, exit_when_offline);
    for topic in matches.get_many::<String>("listen").into_iter().flatten() {
        let name = topic.clone();
        client.add_listener(topic.as_str(), move |data: &Value| {
            println!("{name} {data}");
        });
    }

    // queued by the client until the registration is acknowledged
    for (topic, data) in outgoing {
        client.send(topic, data);
    }

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
            log::info!("Interrupted, closing connection");
            client.close();
        }
        () = client.closed() => {}
    }

    client.closed().await;
    log::info!("chayns-ws stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_message() {
        let (topic, data) = parse_message(r#"chat={"text":"hi"}"#).expect("valid message");
        assert_eq!(topic, "chat");
        assert_eq!(data, json!({ "text": "hi" }));

        // only the first '=' separates
        let (topic, data) = parse_message(r#"eq="a=b""#).expect("valid message");
        assert_eq!(topic, "eq");
        assert_eq!(data, json!("a=b"));
    }

    #[tokio::test]
    async fn test_offline_without_reconnect_ends_client() {
        // nothing listens on the discard port, the attempt is refused right away
        let config = ClientConfig::new("ws://127.0.0.1:9").auto_reconnect(false);
        let client = WebSocketClient::new("cli", Value::Null, config);
        watch_lifecycle(&client, true);

        tokio::time::timeout(std::time::Duration::from_secs(10), client.closed())
            .await
            .expect("client closed after going offline");
        assert!(client.is_closed());
    }

    #[test]
    fn test_parse_message_rejects_bad_input() {
        assert!(parse_message("no-separator").is_err());
        assert!(parse_message("=1").is_err());
        assert!(parse_message("chat={oops").is_err());
    }
}
