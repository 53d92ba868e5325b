//! Fixture builders for module archives and config stores.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use zip::ZipWriter;
use zip::write::FileOptions;

use crate::archive::{CERTIFICATE_ENTRY, DESCRIPTOR_ENTRY};

pub type FixtureResult<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;

const LICENSE_ENTRY: &str = "license.html";

// 1.2.840.113549.1.7.2 (signedData) and 1.2.840.113549.1.7.1 (data)
const OID_SIGNED_DATA: &[u8] = &[
    0x06, 0x09, 0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x07, 0x02,
];
const OID_DATA: &[u8] = &[
    0x06, 0x09, 0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x07, 0x01,
];

/// What to put into a fixture module archive.
#[derive(Debug, Clone)]
pub struct ModuleSpec {
    pub file_name: String,
    pub module_id: String,
    pub common_name: String,
    pub license_text: Option<String>,
    pub with_certificate: bool,
}

impl ModuleSpec {
    pub fn new(file_name: &str, module_id: &str) -> Self {
        Self {
            file_name: file_name.to_string(),
            module_id: module_id.to_string(),
            common_name: module_id.to_string(),
            license_text: Some(format!("<html>License for {module_id}</html>")),
            with_certificate: true,
        }
    }

    pub fn without_license(mut self) -> Self {
        self.license_text = None;
        self
    }

    pub fn without_certificate(mut self) -> Self {
        self.with_certificate = false;
        self
    }
}

#[derive(Debug, Clone)]
pub struct ModuleFixture {
    pub path: PathBuf,
    pub certificate_der: Vec<u8>,
    pub license_text: String,
}

/// Write a module archive described by `spec` into `dir`.
pub fn write_module(dir: &Path, spec: &ModuleSpec) -> FixtureResult<ModuleFixture> {
    let path = dir.join(&spec.file_name);
    let certificate_der = self_signed_der(&spec.common_name)?;

    let mut zip = ZipWriter::new(File::create(&path)?);
    let options = FileOptions::default();

    if spec.with_certificate {
        zip.start_file(CERTIFICATE_ENTRY, options)?;
        zip.write_all(&certs_only_pkcs7(&certificate_der))?;
    }

    let license_tag = if spec.license_text.is_some() {
        format!("<license>{LICENSE_ENTRY}</license>")
    } else {
        String::new()
    };
    zip.start_file(DESCRIPTOR_ENTRY, options)?;
    write!(
        zip,
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<modules><module><id>{}</id><name>{}</name><version>1.0.0</version>{license_tag}</module></modules>",
        spec.module_id, spec.module_id
    )?;

    if let Some(text) = &spec.license_text {
        zip.start_file(LICENSE_ENTRY, options)?;
        zip.write_all(text.as_bytes())?;
    }
    zip.finish()?;

    Ok(ModuleFixture {
        path,
        certificate_der,
        license_text: spec.license_text.clone().unwrap_or_default(),
    })
}

/// DER of a fresh self-signed certificate with subject `CN=<common_name>`.
pub fn self_signed_der(common_name: &str) -> FixtureResult<Vec<u8>> {
    let mut params = CertificateParams::new(vec![format!("{common_name}.test")])?;
    let mut name = DistinguishedName::new();
    name.push(DnType::CommonName, common_name);
    params.distinguished_name = name;
    let key = KeyPair::generate()?;
    let cert = params.self_signed(&key)?;
    Ok(cert.der().to_vec())
}

/// Wrap already-encoded certificates into a DER certs-only PKCS#7 bundle.
pub fn certs_only_pkcs7(certificates: &[u8]) -> Vec<u8> {
    let version = [0x02, 0x01, 0x01];
    let digest_algorithms = der(0x31, &[]);
    let encap_content_info = der(0x30, OID_DATA);
    let certs = der(0xa0, certificates);
    let signer_infos = der(0x31, &[]);

    let signed_data = der(
        0x30,
        &[
            &version[..],
            &digest_algorithms,
            &encap_content_info,
            &certs,
            &signer_infos,
        ]
        .concat(),
    );
    der(0x30, &[OID_SIGNED_DATA, &der(0xa0, &signed_data)].concat())
}

fn der(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    let len = content.len();
    if len < 0x80 {
        out.push(len as u8);
    } else {
        let bytes: Vec<u8> = len
            .to_be_bytes()
            .into_iter()
            .skip_while(|b| *b == 0)
            .collect();
        out.push(0x80 | bytes.len() as u8);
        out.extend_from_slice(&bytes);
    }
    out.extend_from_slice(content);
    out
}

/// Create an empty config store with the registry tables at `path`.
pub fn create_store(path: &Path) -> FixtureResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let conn = rusqlite::Connection::open(path)?;
    conn.execute_batch(crate::store::SCHEMA_SQL)?;
    Ok(())
}
