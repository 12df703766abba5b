mod activity;
mod catalog;
mod cli;
mod config;
mod controller;
mod library;
mod logger;
mod view;

use anyhow::Result;

fn main() -> Result<()> {
    cli::run()
}
