//! Session lifecycle example - init, work, fail, tear down

use std::sync::Arc;
use std::time::Duration;

use content::{cleanup, ChannelSink, ContentConfig, ContentSession, GuardError};
use dom::{handler, observer_callback, Document, Event, ListenerOptions, ObserverKind, ObserverOptions, WINDOW_ID};
use serde_json::json;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let config = ContentConfig {
        debug: true,
        ..ContentConfig::default()
    };
    let document = Arc::new(Document::new("https://shop.example.com/catalog")?);

    // The coordinator side of the error channel
    let (sink, mut reports) = ChannelSink::new();
    tokio::spawn(async move {
        while let Some(report) = reports.recv().await {
            println!("📨 Report: {}", serde_json::to_string(&report).unwrap_or_default());
        }
    });

    let session = ContentSession::new(config, document.clone(), Arc::new(sink));
    let mut events = session.event_bus.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            println!("📢 Event: {:?}", event);
        }
    });

    session.init().await?;
    session.activate(vec![".product".to_string()]).await?;

    let registry = session.registry();
    let list = document.create_element("ul");
    registry.register_listener(
        list.clone(),
        "click",
        handler(|event| println!("🖱  click on node {}", event.target)),
        ListenerOptions::default(),
    );

    let observer = registry.create_observer(
        ObserverKind::Mutation,
        observer_callback(|records| println!("🔍 {} mutation(s)", records.len())),
        ObserverOptions::child_list_subtree(),
    )?;
    observer.observe(list.id())?;

    registry.schedule_repeating(|| println!("⏱  heartbeat"), Duration::from_millis(200));
    registry.add_cleanup(cleanup(|| {
        println!("🧹 custom cleanup");
        Ok(())
    }));

    list.dispatch(&Event::new("click", list.id()));
    document.notify(ObserverKind::Mutation, list.id(), "childList", json!({ "added": 2 }));

    // A scraping step that takes too long
    let slow = session.guard().wrap("extract", |ms: u64| async move {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok::<_, std::io::Error>(ms)
    });
    match slow.call(100).await {
        Ok(ms) => println!("✅ extract finished in {}ms", ms),
        Err(GuardError::Timeout { label, after }) => println!("⌛ {} timed out after {:?}", label, after),
        Err(GuardError::Failed(e)) => println!("❌ extract failed: {}", e),
    }

    // An uncaught page error
    document.dispatch(&Event::new("error", WINDOW_ID).with_detail(json!({ "message": "price is NaN" })))?;

    tokio::time::sleep(Duration::from_millis(500)).await;
    println!("📊 Usage: {:?}", registry.usage_snapshot());

    if let Some(report) = session.teardown().await {
        println!("🛑 Released {} resources ({} failures)", report.total(), report.failures);
    }
    println!("📊 Usage after teardown: {:?}", session.registry().usage_snapshot());

    Ok(())
}
