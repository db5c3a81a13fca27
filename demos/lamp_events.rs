//! Example: Subscribe to a range of addressable lamps with inline callbacks.

use pertronic_mimic::{MimicPanel, PanelConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = PanelConfig::builder()
        .host("192.168.1.1")
        .port(20108)
        .read_timeout_ms(2000)
        .build();

    let mut panel = MimicPanel::new(config);

    if let Err(e) = panel.test_connection().await {
        println!("Interface not reachable: {}", e);
        return Ok(());
    }

    // Callbacks run on the I/O task for every LED mimic frame; keep them short.
    for lamp in 1..=32 {
        panel
            .subscribe_lamp(lamp, move |on| {
                if on {
                    println!("Lamp {} lit", lamp);
                }
            })
            .await?;
    }
    panel
        .subscribe_condition("fire", |state| println!("FIRE: {:?}", state))
        .await?;

    panel.start().await?;
    println!("Listening for lamps 1-32 (Ctrl+C to stop)...\n");
    tokio::signal::ctrl_c().await?;

    for lamp in 1..=32 {
        if panel.led_state(lamp).await == Some(true) {
            println!("Lamp {} is still lit", lamp);
        }
    }
    panel.stop().await?;
    Ok(())
}
