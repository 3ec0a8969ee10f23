use colored::Colorize;
use tiercache::InvalidationMessage;
use tiercache::invalidation::InvalidationCommand;

pub fn print_success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

pub fn print_warning(msg: &str) {
    eprintln!("{} {}", "!".yellow(), msg);
}

pub fn print_value(value: Option<&str>) {
    match value {
        Some(v) => println!("{v}"),
        None => println!("{}", "(nil)".dimmed()),
    }
}

pub fn print_keys(scope: &str, keys: &[String]) {
    if keys.is_empty() {
        println!("No keys recorded for scope {scope}.");
        return;
    }
    for key in keys {
        println!("{key}");
    }
    println!("{}: {}", "Total".cyan(), keys.len());
}

pub fn print_invalidation(channel: &str, message: &InvalidationMessage) {
    let origin = message.origin().dimmed();
    match message.command() {
        InvalidationCommand::Clear { kind, data } => {
            println!("{} {} type={kind} data={data} ({origin})", "CLEAR ".yellow(), channel);
        }
        InvalidationCommand::Remove { key } => {
            println!("{} {} key={key} ({origin})", "REMOVE".red(), channel);
        }
    }
}
