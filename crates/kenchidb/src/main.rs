use anyhow::Context;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let path = args.next().context("usage: kenchidb <file> <key> [value]")?;
    let key = args.next().context("usage: kenchidb <file> <key> [value]")?;
    let value = args.next();

    let store = kenchidb::open(
        kenchidb::StoreConfig::builder()
            .file_name(&path)
            .build()
            .context("building store config")?,
    )
    .context("opening store")?;
    let map = kenchidb::open_map(&store, "default").context("opening map")?;

    match value {
        Some(value) => {
            map.put(key.clone(), value)?;
            store.commit()?;
            println!("set {key}");
        }
        None => match map.get(&key)? {
            Some(value) => println!("{}", String::from_utf8_lossy(&value)),
            None => println!("(not found)"),
        },
    }

    store.close().context("closing store")?;
    Ok(())
}
