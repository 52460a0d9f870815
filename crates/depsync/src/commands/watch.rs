//! `depsync watch`: print the state every time it changes, until Ctrl-C or
//! until the client gives up reconnecting to the daemon.

use depsync_config::Config;

use crate::cli::{GlobalOpts, OutputFormat};
use crate::commands::Session;
use crate::error::CliError;
use crate::output::{self, DepsView};

pub async fn handle(config: &Config, global: &GlobalOpts) -> Result<(), CliError> {
    let session = Session::open(config, true).await?;
    let controller = &session.controller;
    let color = output::should_color(global.color);

    let mut uv = controller.uv_stream();
    let mut conda = controller.conda_stream();
    let mut last_printed = None;
    let mut lost = false;

    loop {
        let view = DepsView::from_states(uv.current(), conda.current());
        let loaded = uv.current().loaded || conda.current().loaded;
        if loaded || !view.errors.is_empty() {
            let rendered = output::render_feed_entry(global.output, &view, color);
            if last_printed.as_ref() != Some(&rendered) {
                if global.output == OutputFormat::Text && last_printed.is_some() {
                    let stamp = chrono::Local::now().format("%H:%M:%S");
                    output::print_output(&format!("── {stamp} ──"), global.quiet);
                }
                output::print_output(&rendered, global.quiet);
                last_printed = Some(rendered);
            }
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            () = session.connection_failed() => {
                lost = true;
                break;
            }
            state = uv.changed() => if state.is_none() { break },
            state = conda.changed() => if state.is_none() { break },
        }
    }

    if lost {
        tracing::warn!("daemon reconnect attempts exhausted, stopping watch");
        let err = session.connection_lost();
        session.close().await;
        return Err(err);
    }

    tracing::debug!("watch interrupted");
    session.close().await;
    Ok(())
}
