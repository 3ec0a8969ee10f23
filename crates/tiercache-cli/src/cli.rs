use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "tiercache")]
#[command(about = "tiercache CLI — inspect and invalidate a shared cache")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Settings file (defaults to ./tiercache.toml when present)
    #[arg(short, long, global = true, env = "TIERCACHE_CONFIG")]
    pub config: Option<String>,

    /// Redis URL (overrides the settings file)
    #[arg(long, global = true, env = "TIERCACHE_REDIS_URL")]
    pub redis_url: Option<String>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Read a cached value (strings printed raw, anything else as JSON)
    Get(GetArgs),
    /// Store a string value in a distributed key
    Set(SetArgs),
    /// Remove a key on every node (and from Redis for distributed keys)
    Remove(RemoveArgs),
    /// Flush matching local entries on every node
    Clear(ClearArgs),
    /// List the keys recorded for a base scope
    Keys(KeysArgs),
    /// Print invalidation messages as they are published
    Watch,
}

#[derive(clap::Args)]
pub struct GetArgs {
    /// Cache key
    pub key: String,
}

#[derive(clap::Args)]
pub struct SetArgs {
    /// Cache key
    pub key: String,
    /// Value to store
    pub value: String,
    /// Time to live in seconds (no expiry when omitted)
    #[arg(long)]
    pub ttl: Option<u64>,
}

#[derive(clap::Args)]
pub struct RemoveArgs {
    /// Cache key
    pub key: String,
}

#[derive(clap::Args)]
pub struct ClearArgs {
    /// Entry type (`All`, `Prefix` or a key type such as `Portal`)
    #[arg(name = "type")]
    pub kind: String,
    /// Type-specific data, e.g. a portal id or key prefix
    #[arg(default_value = "")]
    pub data: String,
}

#[derive(clap::Args)]
pub struct KeysArgs {
    /// Base scope id (tenant/company)
    pub scope: String,
    /// Remove every listed key and drop the index
    #[arg(long)]
    pub clear: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_get_help_mentions_json_rendering() {
        let command = Cli::command();
        let about = command
            .find_subcommand("get")
            .and_then(|get| get.get_about())
            .map(|about| about.to_string())
            .unwrap_or_default();
        assert!(about.contains("JSON"), "{about}");
    }

    #[test]
    fn test_parse_set_with_ttl() {
        let cli = Cli::parse_from(["tiercache", "set", "ECM_1.k", "v", "--ttl", "30"]);
        let Commands::Set(args) = cli.command else {
            panic!("expected set");
        };
        assert_eq!(args.key, "ECM_1.k");
        assert_eq!(args.ttl, Some(30));
    }

    #[test]
    fn test_parse_clear_default_data() {
        let cli = Cli::parse_from(["tiercache", "clear", "All"]);
        let Commands::Clear(args) = cli.command else {
            panic!("expected clear");
        };
        assert_eq!(args.kind, "All");
        assert_eq!(args.data, "");
    }
}
