use std::time::Duration;

use anyhow::{Result, bail};
use tiercache::{CacheSettings, CacheValue, Lookup};

use super::Session;
use crate::cli::{ClearArgs, GetArgs, KeysArgs, RemoveArgs, SetArgs};
use crate::output::{print_keys, print_success, print_value, print_warning};

pub async fn get(settings: &CacheSettings, args: GetArgs) -> Result<()> {
    let session = Session::open(settings)?;
    if !session.cache.namespace().is_distributed(&args.key) {
        print_warning("key is not distributed; local entries only exist inside each node");
    }

    match session.cache.get::<CacheValue>(&args.key).await {
        Lookup::Hit(value) => {
            let rendered = match value {
                CacheValue::Text(s) => s,
                other => serde_json::to_string_pretty(&other.to_json())?,
            };
            print_value(Some(&rendered));
        }
        Lookup::Miss => print_value(None),
        Lookup::Failed(e) => {
            session.close();
            return Err(e.into());
        }
    }

    session.close();
    Ok(())
}

pub async fn set(settings: &CacheSettings, args: SetArgs) -> Result<()> {
    let session = Session::open(settings)?;
    if !session.cache.namespace().is_distributed(&args.key) {
        bail!(
            "only distributed keys (tagged '{}') can be written from the CLI",
            session.cache.namespace().distributed_tag()
        );
    }

    let ttl = args.ttl.map(Duration::from_secs);
    session.cache.insert(&args.key, args.value, ttl).await?;
    // Other nodes may hold a stale copy in their request scopes or local tiers
    session.cache.remote().publish_remove(&args.key).await?;
    session.close();

    print_success(&format!("Stored {}", args.key));
    Ok(())
}

pub async fn remove(settings: &CacheSettings, args: RemoveArgs) -> Result<()> {
    let session = Session::open(settings)?;
    session.cache.remove(&args.key).await?;
    session.close();

    print_success(&format!("Removed {}", args.key));
    Ok(())
}

pub async fn clear(settings: &CacheSettings, args: ClearArgs) -> Result<()> {
    let session = Session::open(settings)?;
    session.cache.clear(&args.kind, &args.data).await?;
    session.close();

    print_success(&format!(
        "Published clear for type={} data={}",
        args.kind, args.data
    ));
    Ok(())
}

pub async fn keys(settings: &CacheSettings, args: KeysArgs) -> Result<()> {
    let session = Session::open(settings)?;

    if args.clear {
        let count = session.cache.clear_scope(&args.scope).await?;
        session.close();
        print_success(&format!("Removed {count} keys for scope {}", args.scope));
        return Ok(());
    }

    let keys = session.cache.keys_for_scope(&args.scope).await?;
    session.close();
    print_keys(&args.scope, &keys);
    Ok(())
}
