/// `bridgeboot bootstrap` command implementation
use anyhow::Result;
use tracing::warn;

use bridgeboot::bootstrap;
use bridgeboot::cli::BootstrapArgs;
use bridgeboot::cli_utils::bridgeboot_prefix;
use bridgeboot::config::BridgebootConfig;
use bridgeboot::error::BootstrapError;
use bridgeboot::settings::Settings;
use bridgeboot::store::ArtifactStore;

pub fn run(args: BootstrapArgs, config: &BridgebootConfig) -> Result<()> {
    let outcome = Settings::from_args(args, config);

    if !outcome.residual.is_empty() {
        warn!(
            "{} Ignoring residual arguments: {}",
            bridgeboot_prefix(),
            outcome.residual.join(" ")
        );
    }

    let Some(settings) = outcome.settings else {
        let mut message = String::from("bootstrap settings are invalid");
        for error in &outcome.errors {
            message.push_str("\n  - ");
            message.push_str(error);
        }
        return Err(BootstrapError::InvalidConfiguration(message).into());
    };

    let store = ArtifactStore::open(&settings.cache)?;
    let result = bootstrap::run(&settings, &store)?;

    // The only line on stdout: callers put this on their classpath
    println!("{}", result.path().display());

    Ok(())
}
