use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use openssl::pkey::PKey;
use openssl::rsa::Rsa;
use tracing::info;

use lithium::armor::{self, Block};
use lithium::container::CERTIFICATE_LABEL;
use lithium::key_manager::PRIVATE_KEY_LABEL;
use lithium::{CertManager, Product};

#[derive(Subcommand, Debug)]
pub enum ApplicationCommand {
    /// Retrieve a list of applications you are in possession of certificates
    /// for.
    List,

    /// Create a new application to accept licenses.
    #[command(visible_alias = "c")]
    Create {
        /// The ID of the application.
        id: String,
        /// The name of the application.
        name: String,
        /// The name of the organization which manages the application.
        organization: String,
    },

    /// Create a new root certificate for an application.
    Root(RootArgs),
}

#[derive(Args, Debug)]
pub struct RootArgs {
    /// The ID of the application you wish to create a certificate for.
    #[arg(long, env = "APP_ID")]
    id: String,

    /// The name of the application you wish to create a certificate for.
    #[arg(long, env = "APP_NAME")]
    name: String,

    /// The name of the organization who manages the application you're
    /// generating a certificate for.
    #[arg(long = "org", env = "APP_ORGANIZATION")]
    organization: String,

    /// The length of the secure key used for the certificate.
    #[arg(long = "key-size", env = "LITHIUM_KEY_SIZE", default_value_t = 4096)]
    key_size: u32,
}

pub fn run(command: ApplicationCommand, license_path: &Path) -> Result<()> {
    match command {
        ApplicationCommand::List => list(license_path),
        ApplicationCommand::Create {
            id,
            name,
            organization,
        } => create(license_path, id, name, organization),
        ApplicationCommand::Root(args) => root(license_path, args),
    }
}

fn list(license_path: &Path) -> Result<()> {
    let products = Product::list(license_path).context("could not read license directory")?;

    println!("{:<20} {:<25} {:<25}", "ID", "Name", "Organization");
    for product in products {
        println!(
            "{:<20} {:<25} {:<25}",
            product.id, product.name, product.organization
        );
    }

    Ok(())
}

fn create(license_path: &Path, id: String, name: String, organization: String) -> Result<()> {
    let product = Product::new(id, name, organization);
    product
        .save(license_path)
        .context("could not save the application description file")?;

    Ok(())
}

fn root(license_path: &Path, args: RootArgs) -> Result<()> {
    let product = Product::new(args.id, args.name, args.organization);

    info!(bits = args.key_size, "generating root key pair");
    let private_key = PKey::from_rsa(Rsa::generate(args.key_size)?)?;

    let manager = CertManager::new(product.clone()).with_path(license_path);
    let certificate = manager
        .create_root(&private_key)
        .context("could not create the root certificate")?;

    fs::create_dir_all(license_path)?;

    let key_block = Block::new(
        PRIVATE_KEY_LABEL,
        private_key.rsa()?.private_key_to_der()?,
    );
    fs::write(
        license_path.join(format!("{}.key", product.id)),
        armor::encode(&key_block),
    )?;

    let certificate_block = Block::new(CERTIFICATE_LABEL, certificate.to_der()?);
    fs::write(
        license_path.join(format!("{}.crt", product.id)),
        armor::encode(&certificate_block),
    )?;

    info!(product = %product.id, "root certificate created");
    Ok(())
}
