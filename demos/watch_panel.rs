//! Example: Print LCD text and condition changes as they arrive.

use pertronic_mimic::{MimicPanel, PanelConfig, PanelEvent};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let host = std::env::args().nth(1).unwrap_or_else(|| "192.168.1.1".to_string());
    let config = PanelConfig::builder().host(host).port(20108).build();

    let mut panel = MimicPanel::new(config);
    let mut events = panel.subscribe();
    panel.start().await?;

    println!("Watching panel (Ctrl+C to stop)...\n");

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(PanelEvent::LcdChanged { line1, line2 }) => {
                        println!("+----------------------------------------+");
                        println!("|{:<40}|", line1.unwrap_or_default());
                        println!("|{:<40}|", line2.unwrap_or_default());
                        println!("+----------------------------------------+");
                    }
                    Ok(PanelEvent::ConditionChanged { condition, state }) => {
                        println!("{}: {:?}", condition.label(), state);
                    }
                    Ok(PanelEvent::HealthChanged(health)) => {
                        println!("Link: {}", health);
                    }
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        println!("(missed {} events)", n);
                    }
                    Err(e) => {
                        println!("Event channel error: {}", e);
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nStopping...");
                break;
            }
        }
    }

    let stats = panel.stats().await;
    println!(
        "{} frames, {} discarded, {} invalid, {} bytes dropped",
        stats.frames, stats.discarded, stats.invalid, stats.bytes_dropped
    );
    panel.stop().await?;
    Ok(())
}
