use clap::CommandFactory;
use clap_complete::generate;
use std::collections::HashMap;
use std::sync::Arc;

use crate::cfg::Config;
use crate::dedup::ConsoleReview;
use crate::error::Error;
use crate::error::WrapError;
use crate::gateway::{JsonGateway, ReminderGateway};
use crate::model::{DocTask, RemTask};
use crate::opts::{Command, ConfigCommand, GenerateTarget, LinksCommand, Opts};
use crate::parse::parse_task_line;
use crate::store::LinkStore;
use crate::sync::perform_sync;
use crate::walker::{DocumentWalker, MarkdownWalker};

pub fn run(opts: &Opts) -> Result<(), Error> {
    match opts.command {
        Command::Config(ref cfg_cmd) => match cfg_cmd.command {
            ConfigCommand::Show => {
                let cfg = Config::load().during("reading config")?;
                eprintln!("{cfg:#?}");
            }
        },

        Command::Generate(ref gen) => match gen.target {
            GenerateTarget::HelpMarkdown => println!("{}", clap_markdown::help_markdown::<Opts>()),
            GenerateTarget::Completion(ref comp_opts) => {
                let mut cmd = Opts::command();
                let name = cmd.get_name().to_string();
                generate(comp_opts.shell, &mut cmd, name, &mut std::io::stdout());
            }
        },

        Command::Links(ref links) => {
            let cfg = Config::load().during("reading config")?;
            match links.command {
                LinksCommand::Show => {
                    let mut store = LinkStore::open(&cfg.links_path)?;
                    let links = store.load()?;
                    if links.is_empty() {
                        println!("No links stored at {}.", cfg.links_path);
                    }
                    for link in links {
                        let synced = link
                            .last_synced
                            .map(|t| t.to_rfc3339())
                            .unwrap_or_else(|| "never".into());
                        println!(
                            "{doc} <-> {rem} score={score:.2} vault={vault} last_synced={synced}",
                            doc = link.doc_uuid,
                            rem = link.rem_uuid,
                            score = link.score,
                            vault = link.vault_id,
                        );
                    }
                }
                LinksCommand::Prune(ref prune) => {
                    prune_links(&cfg, &prune.vaults, prune.apply)?;
                }
            }
        }

        Command::Parse(ref parse) => {
            let content = std::fs::read_to_string(&parse.target)
                .map_err(|err| crate::error::handle_load_error(&parse.target, err))?;
            for (number, line) in content.lines().enumerate() {
                if let Some(task) = parse_task_line(line) {
                    println!("{number}: {task:#?}", number = number + 1);
                }
            }
        }

        Command::Reminders(ref reminders) => {
            let cfg = Config::load().during("reading config")?;
            let gateway = JsonGateway::open(&cfg.reminders_store_path)?;
            let tasks = gateway
                .list_tasks(&reminders.list, reminders.include_completed)
                .during("listing reminders")?;
            if reminders.json {
                println!("{}", serde_json::to_string_pretty(&tasks)?);
            } else {
                for task in tasks {
                    let status = match task.status {
                        crate::model::RemStatus::Done => "x",
                        crate::model::RemStatus::Todo => " ",
                    };
                    println!(
                        "[{status}] {title} ({list})",
                        title = task.title,
                        list = task.list_name
                    );
                }
            }
        }

        Command::Sync(ref sync) => {
            let mut cfg = Config::load().during("reading config")?;
            if let Some(direction) = sync.direction {
                cfg.direction = direction;
            }
            let direction = cfg.direction;

            let mut walker = MarkdownWalker;
            let mut gateway =
                JsonGateway::open(&cfg.reminders_store_path).during("opening reminder store")?;
            let mut review = ConsoleReview;

            perform_sync(
                &cfg,
                &sync.vaults,
                direction,
                !sync.apply,
                &mut walker,
                &mut gateway,
                &mut review,
            )?;
        }
    }
    Ok(())
}

fn prune_links(
    cfg: &Config,
    vaults: &[camino::Utf8PathBuf],
    apply: bool,
) -> Result<(), Error> {
    let walker = MarkdownWalker;
    let gateway = JsonGateway::open(&cfg.reminders_store_path)?;

    let mut docs_by_uuid: HashMap<Arc<str>, DocTask> = HashMap::new();
    for vault in vaults {
        for task in walker.list_tasks(vault, true).during("listing vault tasks")? {
            docs_by_uuid.insert(task.uuid.clone(), task);
        }
    }
    let rems_by_uuid: HashMap<Arc<str>, RemTask> = gateway
        .list_tasks(&[], true)
        .during("listing reminders")?
        .into_iter()
        .map(|r| (r.uuid.clone(), r))
        .collect();

    let mut store = LinkStore::open(&cfg.links_path)?;
    let links = store.load()?;
    let total = links.len();
    let (live, dropped) = LinkStore::restore(links, &docs_by_uuid, &rems_by_uuid);

    for link in &dropped {
        println!(
            "broken: {doc} <-> {rem}",
            doc = link.doc_uuid,
            rem = link.rem_uuid
        );
    }
    if apply {
        store.save(&live)?;
        println!("Kept {} of {} links.", live.len(), total);
    } else {
        println!(
            "{} of {} links broken. Re-run with --apply to remove them.",
            dropped.len(),
            total
        );
    }
    Ok(())
}
