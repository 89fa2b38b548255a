use crate::{
    error::AuthError,
    verifier::{
        config::{FileTemplates, TemplateSource, VerifierConfig, VerifierSettings},
        evaluate::AttributeSet,
        Credential, CredentialVerifier, Verifier,
    },
};
use anyhow::{anyhow, Context, Result};
use tracing::debug;

#[derive(Debug)]
pub struct Args {
    pub template: String,
    pub templates_dir: String,
    pub settings: VerifierSettings,
    pub credential: Credential,
}

/// Load the template and validate the settings.
///
/// # Errors
/// Returns an error if the template cannot be loaded or the settings are invalid.
pub fn config(
    source: &impl TemplateSource,
    template: &str,
    mut settings: VerifierSettings,
) -> Result<VerifierConfig> {
    let body = source
        .load(template)
        .with_context(|| format!("failed to load template: {template}"))?;
    settings.template = Some(body);

    VerifierConfig::try_from(settings).context("invalid verifier configuration")
}

/// Verify the credential and return the attribute set.
///
/// # Errors
/// Returns an error if the configuration is invalid, the credentials are
/// wrong, or the webservice cannot be reached.
pub async fn verify(args: Args) -> Result<AttributeSet> {
    let templates = FileTemplates::new(&args.templates_dir);
    debug!(dir = %templates.dir().display(), template = %args.template, "loading template");

    let config = config(&templates, &args.template, args.settings)?;
    let verifier = Verifier::new(config).context("failed to build HTTP client")?;

    match verifier.verify(&args.credential).await {
        Ok(attributes) => Ok(attributes),
        Err(AuthError::WrongCredentials) => Err(anyhow!("wrong username or password")),
        Err(e) => Err(anyhow!(e).context("credential verification failed")),
    }
}

/// Execute the verify action, printing the attribute set as JSON on stdout.
/// # Errors
/// Returns an error if verification fails for any reason.
pub async fn execute(args: Args) -> Result<()> {
    let attributes = verify(args).await?;
    let json = serde_json::to_string_pretty(&attributes)?;
    println!("{json}");
    Ok(())
}
