//! Module archive inspection.
//!
//! A module archive is a zip bundle carrying:
//! - `certificates.p7b`: DER PKCS#7 certs-only bundle; the first certificate
//!   is the module's signing certificate
//! - `module.xml`: descriptor with the module `<id>` and an optional
//!   `<license>` entry naming the license file inside the archive

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use sha1::{Digest, Sha1};
use x509_parser::der_parser::asn1_rs::{Any, Class, Tag};
use x509_parser::prelude::{FromDer, X509Certificate};
use zip::ZipArchive;
use zip::result::ZipError;

use crate::error::{RegistryError, Result};

pub const CERTIFICATE_ENTRY: &str = "certificates.p7b";
pub const DESCRIPTOR_ENTRY: &str = "module.xml";

/// SHA-1 fingerprint over the DER encoding of a certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Thumbprint([u8; 20]);

impl Thumbprint {
    pub fn of_der(der: &[u8]) -> Self {
        let mut digest = [0u8; 20];
        digest.copy_from_slice(&Sha1::digest(der));
        Self(digest)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Thumbprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleCertificate {
    pub thumbprint: Thumbprint,
    pub subject_name: String,
}

/// License acceptance key: the module id plus the CRC-32 of the license text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleLicense {
    pub module_id: String,
    pub checksum: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleMetadata {
    pub module_id: String,
    pub certificate: ModuleCertificate,
    /// `None` when the descriptor declares no license.
    pub license: Option<ModuleLicense>,
}

/// Open `path` and extract the certificate and license metadata.
pub fn inspect(path: &Path) -> Result<ModuleMetadata> {
    let file = File::open(path).map_err(|e| RegistryError::io(path, e))?;
    let mut archive = ZipArchive::new(file).map_err(|source| RegistryError::Archive {
        path: path.to_path_buf(),
        source,
    })?;

    let bundle = read_entry(&mut archive, path, CERTIFICATE_ENTRY)?;
    let certificate = parse_certificate_bundle(path, &bundle)?;

    let descriptor_bytes = read_entry(&mut archive, path, DESCRIPTOR_ENTRY)?;
    let descriptor_text =
        String::from_utf8(descriptor_bytes).map_err(|e| RegistryError::Descriptor {
            path: path.to_path_buf(),
            message: format!("not UTF-8: {e}"),
        })?;
    let descriptor = parse_descriptor(path, &descriptor_text)?;

    let license = match descriptor.license_file {
        Some(name) => {
            let text = read_entry(&mut archive, path, &name)?;
            Some(ModuleLicense {
                module_id: descriptor.id.clone(),
                checksum: crc32fast::hash(&text),
            })
        }
        None => None,
    };

    Ok(ModuleMetadata {
        module_id: descriptor.id,
        certificate,
        license,
    })
}

fn read_entry(archive: &mut ZipArchive<File>, path: &Path, name: &str) -> Result<Vec<u8>> {
    let mut entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(ZipError::FileNotFound) => {
            return Err(RegistryError::MissingEntry {
                path: path.to_path_buf(),
                entry: name.to_string(),
            });
        }
        Err(source) => {
            return Err(RegistryError::Archive {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    let mut buf = Vec::with_capacity(usize::try_from(entry.size()).unwrap_or_default());
    entry
        .read_to_end(&mut buf)
        .map_err(|e| RegistryError::io(path, e))?;
    Ok(buf)
}

/// Fingerprint and subject of the first certificate in a DER PKCS#7 bundle.
pub fn parse_certificate_bundle(path: &Path, bundle: &[u8]) -> Result<ModuleCertificate> {
    let invalid = |message: String| RegistryError::Certificate {
        path: path.to_path_buf(),
        message,
    };

    let der = first_certificate_der(bundle).map_err(invalid)?;
    let (_, cert) =
        X509Certificate::from_der(der).map_err(|e| invalid(format!("bad certificate: {e}")))?;

    Ok(ModuleCertificate {
        thumbprint: Thumbprint::of_der(der),
        subject_name: cert.subject().to_string(),
    })
}

// ContentInfo { contentType, [0] EXPLICIT SignedData { version,
// digestAlgorithms, encapContentInfo, [0] IMPLICIT certificates, ... } }
fn first_certificate_der(bundle: &[u8]) -> std::result::Result<&[u8], String> {
    let content_info = element(bundle, "ContentInfo")?.1;
    expect_universal(&content_info, Tag::Sequence, "ContentInfo")?;

    let (rest, _content_type) = element(content_info.data, "contentType")?;
    let (_, explicit) = element(rest, "content")?;
    expect_context(&explicit, 0, "content")?;

    let (_, signed_data) = element(explicit.data, "SignedData")?;
    expect_universal(&signed_data, Tag::Sequence, "SignedData")?;

    let mut cursor = signed_data.data;
    for field in ["version", "digestAlgorithms", "encapContentInfo"] {
        cursor = element(cursor, field)?.0;
    }

    let (_, certificates) = element(cursor, "certificates")?;
    expect_context(&certificates, 0, "certificates")?;

    let certs = certificates.data;
    let (rest, first) = element(certs, "certificate")?;
    expect_universal(&first, Tag::Sequence, "certificate")?;
    Ok(&certs[..certs.len() - rest.len()])
}

fn element<'a>(input: &'a [u8], what: &str) -> std::result::Result<(&'a [u8], Any<'a>), String> {
    Any::from_der(input).map_err(|e| format!("malformed {what}: {e}"))
}

fn expect_universal(any: &Any<'_>, tag: Tag, what: &str) -> std::result::Result<(), String> {
    if any.header.class() == Class::Universal && any.header.tag() == tag {
        Ok(())
    } else {
        Err(format!("unexpected tag for {what}: {:?}", any.header.tag()))
    }
}

fn expect_context(any: &Any<'_>, number: u32, what: &str) -> std::result::Result<(), String> {
    if any.header.class() == Class::ContextSpecific && any.header.tag() == Tag(number) {
        Ok(())
    } else {
        Err(format!("expected [{number}] for {what}"))
    }
}

struct Descriptor {
    id: String,
    license_file: Option<String>,
}

fn parse_descriptor(path: &Path, xml: &str) -> Result<Descriptor> {
    let invalid = |message: String| RegistryError::Descriptor {
        path: path.to_path_buf(),
        message,
    };

    let doc = roxmltree::Document::parse(xml).map_err(|e| invalid(e.to_string()))?;
    let module = doc
        .descendants()
        .find(|node| node.has_tag_name("module"))
        .unwrap_or_else(|| doc.root_element());

    let id = child_text(module, "id").ok_or_else(|| invalid("missing <id>".to_string()))?;
    Ok(Descriptor {
        id,
        license_file: child_text(module, "license"),
    })
}

fn child_text(node: roxmltree::Node<'_, '_>, name: &str) -> Option<String> {
    node.children()
        .find(|child| child.has_tag_name(name))
        .and_then(|child| child.text())
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}
