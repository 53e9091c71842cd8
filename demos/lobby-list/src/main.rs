//! Lists the public games on a Hazel server.
//!
//! ```text
//! cargo run -p lobby-list -- 127.0.0.1:22023 [polus|mira|skeld]
//! RUST_LOG=hazel_session=trace cargo run -p lobby-list -- 127.0.0.1:22023
//! ```

use std::net::SocketAddr;

use hazel::prelude::*;
use tracing_subscriber::EnvFilter;

const DEFAULT_SERVER: &str = "127.0.0.1:22023";

fn parse_map(name: &str) -> Option<GameMap> {
    match name.to_ascii_lowercase().as_str() {
        "skeld" => Some(GameMap::TheSkeld),
        "mira" => Some(GameMap::MiraHq),
        "polus" => Some(GameMap::Polus),
        _ => None,
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let server: SocketAddr = args.next().as_deref().unwrap_or(DEFAULT_SERVER).parse()?;
    let map = args.next().as_deref().and_then(parse_map);

    let (client, _events) = HazelClient::new(UdpConnector, ClientConfig::default());
    client.connect(server).await?;

    // Searches take a bitmask of maps rather than a single map id.
    let options = GameOptions {
        map: map.map_or(0b111, |m| 1 << m.as_u8()),
        ..GameOptions::default()
    };
    let games = client.find_games(options).await?;
    client.disconnect().await;

    if games.is_empty() {
        println!("no public games on {server}");
        return Ok(());
    }
    println!("{:<8} {:<20} {:>7} {:>6}", "CODE", "HOST", "PLAYERS", "AGE");
    for game in games {
        println!(
            "{:<8} {:<20} {:>3}/{:<3} {:>5}s",
            game.code, game.host_name, game.players, game.max_players, game.age
        );
    }
    Ok(())
}
