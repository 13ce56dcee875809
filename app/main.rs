use std::{
    fs::read,
    io::{stdin, stdout, Read, Write},
    path::PathBuf,
    process::exit,
    sync::Arc,
};

use clap::{Parser, Subcommand};
use page_store::{Author, Error, RevisionStore, VersionResolver, WriteCoordinator};

#[derive(Parser, Debug)]
#[command(about = "a versioned store of plain-text pages")]
struct Arguments {
    #[arg(
        short,
        long,
        global = true,
        env = "PAGESTORE_DIR",
        default_value = ".",
        help = "root directory of the page store"
    )]
    dir: PathBuf,
    #[clap(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[clap(about = "initialize a revision history, if there is none yet")]
    Init,
    #[clap(about = "write a page and commit it")]
    Save {
        #[arg(help = "page path relative to the store root")]
        path: String,
        #[arg(short, long, help = "message to leave with this revision")]
        message: Option<String>,
        #[arg(short, long, default_value = "anonymous", help = "author name")]
        author: String,
        #[arg(short, long, help = "author email")]
        email: Option<String>,
        #[arg(short, long, help = "read the page from this file instead of stdin")]
        file: Option<PathBuf>,
    },
    #[clap(about = "print a page, current or at a past version")]
    Cat {
        path: String,
        #[arg(short, long, help = "4 to 40 leading characters of a revision id")]
        version: Option<String>,
    },
    #[clap(about = "list page paths, current or at a past version")]
    Ls {
        #[arg(short, long, help = "4 to 40 leading characters of a revision id")]
        version: Option<String>,
    },
    #[clap(about = "list revisions from newest to oldest")]
    Log,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Arguments::parse();
    if let Err(err) = run(args) {
        log::error!("{}", err);
        exit(1);
    }
}

fn run(args: Arguments) -> Result<(), Error> {
    use Command::*;
    match args.cmd {
        Init => {
            RevisionStore::init_or_open(&args.dir)?;
        }
        Save {
            path,
            message,
            author,
            email,
            file,
        } => {
            let store = Arc::new(RevisionStore::open(&args.dir)?);
            let content = match file {
                Some(file) => read(file)?,
                None => {
                    let mut content = Vec::new();
                    stdin().read_to_end(&mut content)?;
                    content
                }
            };
            let mut author = Author::new(author);
            if let Some(email) = email {
                author = author.with_email(email);
            }
            let id = WriteCoordinator::new(store).save(&path, &content, message.as_deref(), &author)?;
            println!("{}", id);
        }
        Cat { path, version } => {
            let store = Arc::new(RevisionStore::open(&args.dir)?);
            let content = match version {
                Some(version) => VersionResolver::new(store).resolve(&path, &version)?,
                None => {
                    let page = store.page_path(&path)?;
                    match store.read_current(&page)? {
                        Some(content) => content,
                        None => {
                            log::error!("{} has not been committed", page);
                            exit(1);
                        }
                    }
                }
            };
            stdout().write_all(&content)?;
        }
        Ls { version } => {
            let store = Arc::new(RevisionStore::open(&args.dir)?);
            let pages = match version {
                Some(version) => VersionResolver::new(store).list(&version)?,
                None => store.list_current()?,
            };
            let mut out = stdout().lock();
            for page in pages {
                writeln!(out, "{}", page)?;
            }
        }
        Log => {
            let store = RevisionStore::open(&args.dir)?;
            let mut out = stdout().lock();
            for entry in store.history()? {
                let (id, revision) = entry?;
                writeln!(
                    out,
                    "{}  {}  {}  {}",
                    id,
                    revision.timestamp.to_rfc3339(),
                    revision.author,
                    revision.message
                )?;
            }
        }
    }
    Ok(())
}
