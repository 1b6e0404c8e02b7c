use serde::Serialize;
use tracing_subscriber::{fmt, EnvFilter};
use utpl::engine;

#[derive(Serialize, Debug)]
struct Item {
    name: String,
    qty: i64,
}

#[derive(Serialize, Debug)]
struct Page {
    title: String,
    admin: bool,
    items: Vec<Item>,
}

fn main() -> anyhow::Result<()> {
    fmt().with_env_filter(EnvFilter::new("debug")).init();

    engine::parse("row", "<li>{{name}} x{{qty}}</li>");
    engine::parse(
        "page",
        "<h1>{{title}}</h1><ul>{{each items}}{{%row}}{{/each}}</ul>{{if admin}}<p>admin</p>{{else}}<p>guest</p>{{/if}}",
    );

    let view = Page {
        title: "Inventory".into(),
        admin: true,
        items: vec![
            Item {
                name: "bolt".into(),
                qty: 12,
            },
            Item {
                name: "nut".into(),
                qty: 7,
            },
        ],
    };
    let html = engine::render("page", &view)?;
    println!("{html}");
    Ok(())
}
