use crate::cipher;
use crate::error::BlobError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use dotscope::metadata::cilobject::CilObject;
use serde::Serialize;
use sha1::Sha1;
use sha2::{Digest, Sha256};

/// How a hidden blob was encoded, inferred from its delimiters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodedBlob<'a> {
    /// `<base64 path>:<base64 binary>`
    TwoPart { path: &'a str, binary: &'a str },
    /// `<key>#<substituted path>#<substituted binary>`
    ThreePart {
        key: i64,
        path: &'a str,
        binary: &'a str,
    },
    Unrecognized {
        colon_parts: usize,
        hash_parts: usize,
    },
}

/// Path and content recovered from a blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedBlob {
    pub path: String,
    pub bytes: Vec<u8>,
}

impl<'a> EncodedBlob<'a> {
    /// # Errors
    ///
    /// Fails if a three-part blob does not start with an integer key.
    pub fn classify(text: &'a str) -> Result<Self, BlobError> {
        let text = text.trim();

        let colon: Vec<&str> = text.split(':').collect();
        if let [path, binary] = colon[..] {
            return Ok(EncodedBlob::TwoPart { path, binary });
        }

        let hash: Vec<&str> = text.split('#').collect();
        if let [key, path, binary] = hash[..] {
            let key = key
                .trim()
                .parse()
                .map_err(|_| BlobError::InvalidKey(key.to_string()))?;
            return Ok(EncodedBlob::ThreePart { key, path, binary });
        }

        Ok(EncodedBlob::Unrecognized {
            colon_parts: colon.len(),
            hash_parts: hash.len(),
        })
    }

    /// # Errors
    ///
    /// Fails on an unrecognized shape, bad substitution symbols, bad base64
    /// or a non UTF-8 path.
    pub fn decode(&self) -> Result<DecodedBlob, BlobError> {
        let (path, bytes) = match *self {
            EncodedBlob::TwoPart { path, binary } => (from_base64(path)?, from_base64(binary)?),
            EncodedBlob::ThreePart { key, path, binary } => (
                from_base64(&cipher::decode(key, &compact(path))?)?,
                from_base64(&cipher::decode(key, &compact(binary))?)?,
            ),
            EncodedBlob::Unrecognized {
                colon_parts,
                hash_parts,
            } => {
                return Err(BlobError::Shape {
                    colon_parts,
                    hash_parts,
                })
            }
        };
        let path = String::from_utf8(path).map_err(|_| BlobError::PathNotUtf8)?;
        Ok(DecodedBlob { path, bytes })
    }
}

fn compact(text: &str) -> String {
    text.chars().filter(|c| !c.is_ascii_whitespace()).collect()
}

fn from_base64(text: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(compact(text))
}

/// Reads the declared assembly name out of a managed binary.
pub trait ModuleInspector: Sync {
    /// # Errors
    ///
    /// Fails if `bytes` is not a .NET module.
    fn module_name(&self, bytes: &[u8]) -> Result<String, BlobError>;
}

impl<F> ModuleInspector for F
where
    F: Fn(&[u8]) -> Result<String, BlobError> + Sync,
{
    fn module_name(&self, bytes: &[u8]) -> Result<String, BlobError> {
        self(bytes)
    }
}

/// Parses the CLI metadata of a PE image.
#[derive(Debug, Default, Clone, Copy)]
pub struct CilInspector;

impl ModuleInspector for CilInspector {
    fn module_name(&self, bytes: &[u8]) -> Result<String, BlobError> {
        let object =
            CilObject::from_mem(bytes.to_vec()).map_err(|e| BlobError::Metadata(e.to_string()))?;
        // Netmodules carry no Assembly row
        object
            .assembly()
            .map(|assembly| assembly.name.clone())
            .or_else(|| object.module().map(|module| module.name.clone()))
            .ok_or_else(|| BlobError::Metadata("no Assembly or Module row".to_string()))
    }
}

/// A decoded hidden module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractedAssembly {
    /// Position of the blob among the hidden blocks, starting at 1 (block 0
    /// is the batch script).
    pub block: usize,
    pub declared_path: String,
    #[serde(skip)]
    pub raw_bytes: Vec<u8>,
    pub size: usize,
    pub sha1: String,
    pub sha256: String,
    pub module_name: String,
}

/// What a correlated task learns about its module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssemblySummary {
    pub declared_path: String,
    pub sha1: String,
    pub sha256: String,
    pub module_name: String,
}

impl ExtractedAssembly {
    pub fn file_name(&self) -> &str {
        windows_file_name(&self.declared_path)
    }

    pub fn summary(&self) -> AssemblySummary {
        AssemblySummary {
            declared_path: self.declared_path.clone(),
            sha1: self.sha1.clone(),
            sha256: self.sha256.clone(),
            module_name: self.module_name.clone(),
        }
    }
}

/// Final component of a Windows path.
pub fn windows_file_name(path: &str) -> &str {
    let path = path.trim_end_matches(['\\', '/']);
    let name = path.rsplit(['\\', '/']).next().unwrap_or(path);
    // Drive-relative paths such as `C:Foo.dll`
    match name.as_bytes() {
        [drive, b':', ..] if drive.is_ascii_alphabetic() => &name[2..],
        _ => name,
    }
}

/// Decodes, hashes and identifies one hidden blob.
///
/// # Errors
///
/// Any decoding step or the module inspection can fail.
pub fn extract(
    block: usize,
    text: &str,
    inspector: &dyn ModuleInspector,
) -> Result<ExtractedAssembly, BlobError> {
    let DecodedBlob { path, bytes } = EncodedBlob::classify(text)?.decode()?;
    let module_name = inspector.module_name(&bytes)?;
    Ok(ExtractedAssembly {
        block,
        declared_path: path,
        size: bytes.len(),
        sha1: hex::encode(Sha1::digest(&bytes)),
        sha256: hex::encode(Sha256::digest(&bytes)),
        module_name,
        raw_bytes: bytes,
    })
}
