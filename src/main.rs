use anyhow::Context as _;
use std::io::Read as _;
use wiki_expand::{
    Configuration, Engine, FileContentProvider, MapContentProvider, Model, TemplateCache,
    converter::EventTrace,
};

/// What to print.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Output {
    /// Fully expanded Wikitext.
    Wikitext,
    /// An indented trace of document tree events.
    Events,
    /// HTML.
    Html,
}

fn usage<T>(err: &'static str) -> anyhow::Result<T> {
    let exe = std::env::args().next().unwrap_or_default();
    println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    println!("Usage: {exe} [options] [input.wiki]\n");
    println!("Reads from stdin if no input file is given.\n");
    println!("Options:");
    println!("    --config <file>: JSON configuration file");
    println!("    --templates <dir>: Directory of <Full_page_name>.wiki files");
    println!("    --title <name>: Title of the rendered page (default: Main Page)");
    println!("    --expand-only: Print the expanded Wikitext instead of HTML");
    println!("    --events: Print the document tree as a stream of events\n");
    Err(anyhow::Error::msg(err))
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let mut args = pico_args::Arguments::from_env();
    if args.contains(["-h", "--help"]) {
        return usage("Help requested");
    }
    let config_path = args.opt_value_from_str::<_, String>("--config")?;
    let templates = args.opt_value_from_str::<_, String>("--templates")?;
    let title = args
        .opt_value_from_str("--title")?
        .unwrap_or_else(|| "Main Page".to_string());
    let output = match (args.contains("--expand-only"), args.contains("--events")) {
        (true, true) => return usage("--expand-only and --events are exclusive"),
        (true, false) => Output::Wikitext,
        (false, true) => Output::Events,
        (false, false) => Output::Html,
    };
    let _ = args.contains("--");
    let input = args.opt_free_from_str::<String>()?;

    if !args.finish().is_empty() {
        return usage("Unknown extra arguments passed");
    }

    let config = match &config_path {
        Some(path) => Configuration::load(path)
            .with_context(|| format!("could not load configuration from {path}"))?,
        None => Configuration::default(),
    };

    let text = match &input {
        Some(path) => {
            std::fs::read_to_string(path).with_context(|| format!("could not read {path}"))?
        }
        None => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("could not read stdin")?;
            text
        }
    };

    let cache = TemplateCache::new(config.cache_size);
    let engine = match templates {
        Some(dir) => Engine::new(config, FileContentProvider::new(format!("{dir}/${{title}}.wiki"))),
        None => Engine::new(config, MapContentProvider::default()),
    }
    .with_cache(cache);

    let mut model = Model::new(&engine, title);
    match output {
        Output::Wikitext => print!("{}", model.parse_templates(&text)),
        Output::Events => {
            let nodes = model.render(&text);
            let mut trace = EventTrace::default();
            wiki_expand::walk(&nodes, &mut trace).context("could not trace document")?;
            print!("{}", trace.out);
        }
        Output::Html => println!("{}", model.render_html(&text)),
    }

    if let Some(target) = model.redirect() {
        log::info!("'{}' is a redirect to {target}", model.title());
    }

    Ok(())
}
