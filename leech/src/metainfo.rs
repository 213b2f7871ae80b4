use std::path::{Component, Path, PathBuf};
use serde_bencode::value::Value;
use serde_derive::Deserialize;
use sha1::Digest;
use crate::{info::TorrentInfo, ID};

#[derive(Debug, thiserror::Error)]
pub enum MetaInfoError {

    #[error("bencode error whilst decoding metainfo: {0}")]
    BencodeError(#[from] serde_bencode::Error),

    #[error("invalid file extension, expected .torrent")]
    InvalidExtension,

    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error("invalid pieces length, must be divisible by 20")]
    InvalidPiecesLength,

    #[error("info dict has neither length nor files")]
    MissingLength,

    #[error("piece length must be non-zero")]
    ZeroPieceLength,

    #[error("file(s) with size 0")]
    FileNoSize,

    #[error("file(s) with no path")]
    FileEmptyPath,

    #[error("name {0:?} is not a plain relative path")]
    InvalidName(String),

    #[error("expected {expected} piece hashes for torrent size, found {found}")]
    PieceCountMismatch {
        expected: u32,
        found: u32,
    },
}

type Result<T> = std::result::Result<T, MetaInfoError>;

#[derive(Debug, Clone, Deserialize)]
pub struct File {

    #[serde(deserialize_with = "crate::de::path_deserialize")]
    pub path: PathBuf,

    pub length: u64,

    #[serde(default)]
    pub md5sum: Option<String>,

}

#[derive(Clone, Deserialize)]
pub struct Info {

    // Suggested name of the file, or directory for multi-file torrents.
    pub name: String,

    // String consisting of the concatenation of all 20-byte SHA1 hash values, one per piece.
    #[serde(with = "serde_bytes")]
    pub pieces: Vec<u8>,

    // Number of bytes in each piece (integer).
    #[serde(rename = "piece length")]
    pub piece_length: u32,

    // A 32-character hexadecimal string corresponding to the MD5 sum of the file.
    #[serde(default)]
    pub md5sum: Option<String>,

    // Length of the file in bytes (integer).
    #[serde(default)]
    pub length: Option<u64>,

    // A list of dictionaries, one for each file.
    #[serde(default)]
    pub files: Option<Vec<File>>,

    #[serde(default)]
    pub private: Option<u8>,

}

// Only the info dict is needed untyped, the hash must cover every key the creator wrote.
#[derive(Deserialize)]
struct RawMetaInfo {
    info: Value,
}

#[derive(Deserialize, Clone)]
pub struct MetaInfo {

    // The announce URL of the tracker (string).
    #[serde(deserialize_with = "crate::de::url_deserialize")]
    pub announce: url::Url,

    // A dictionary that describes the file(s) of the torrent.
    pub info: Info,

    // sha1 hash of info dict
    #[serde(skip)]
    pub info_hash: ID,

    // (optional) the string encoding format used to generate the pieces part of the info
    // dictionary in the .torrent metafile (string).
    #[serde(default)]
    pub encoding: Option<String>,

    // (optional) the creation time of the torrent, in standard UNIX epoch format.
    #[serde(default)]
    #[serde(rename = "creation date")]
    pub creation_date: Option<i64>,

    // (optional) free-form textual comments of the author (string).
    #[serde(default)]
    pub comment: Option<String>,

    // (optional) name and version of the program used to create the .torrent (string).
    #[serde(default)]
    #[serde(rename = "created by")]
    pub created_by: Option<String>,

}

impl MetaInfo {

    pub fn new<P: AsRef<Path>>(path: P) -> Result<MetaInfo> {
        if path.as_ref().extension().unwrap_or_default() != "torrent" {
            return Err(MetaInfoError::InvalidExtension);
        }
        Self::from_bytes(&std::fs::read(path)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<MetaInfo> {

        let mut metainfo: MetaInfo = serde_bencode::from_bytes(bytes)?;
        let raw: RawMetaInfo = serde_bencode::from_bytes(bytes)?;

        if metainfo.info.pieces.len() % 20 != 0 || metainfo.info.pieces.is_empty() {
            return Err(MetaInfoError::InvalidPiecesLength);
        }
        if metainfo.info.piece_length == 0 {
            return Err(MetaInfoError::ZeroPieceLength);
        }
        if metainfo.info.length.is_none() && metainfo.info.files.is_none() {
            return Err(MetaInfoError::MissingLength);
        }
        if metainfo.total_len() == 0 {
            return Err(MetaInfoError::FileNoSize);
        }
        // The name becomes the output file under the download directory.
        if !is_plain_name(&metainfo.info.name) {
            return Err(MetaInfoError::InvalidName(metainfo.info.name.clone()));
        }

        let expected = metainfo.torrent_info().num_pieces;
        if expected != metainfo.num_pieces() {
            return Err(MetaInfoError::PieceCountMismatch {
                expected,
                found: metainfo.num_pieces(),
            });
        }

        metainfo.info_hash = info_hash(&raw.info)?;
        tracing::debug!("metainfo created: {:#?}", metainfo);
        Ok(metainfo)
    }

    pub fn piece_hashes(&self) -> Vec<ID> {
        self.info.pieces
            .chunks_exact(20)
            .filter_map(|c| c.try_into().ok())
            .collect()
    }

    pub fn piece_len(&self) -> u32 { self.info.piece_length }

    pub fn num_pieces(&self) -> u32 { self.info.pieces.len() as u32 / 20 }

    pub fn is_multi_file(&self) -> bool { self.info.files.is_some() }

    // Multi-file torrents are sized by their files but downloaded into a single output file.
    pub fn total_len(&self) -> u64 {
        if let Some(files) = &self.info.files {
            files.iter().map(|f| f.length).sum()
        } else {
            self.info.length.unwrap_or(0)
        }
    }

    // Total length as the 8 byte big-endian field used by the tracker protocol.
    pub fn total_len_be(&self) -> [u8; 8] { self.total_len().to_be_bytes() }

    pub fn torrent_info(&self) -> TorrentInfo {
        TorrentInfo::new(self.total_len(), self.info.piece_length)
    }

    pub fn info_hash(&self) -> ID { self.info_hash }

    pub fn name(&self) -> &str { &self.info.name }

    pub fn info_hash_hex(&self) -> String {
        hex::encode(self.info_hash)
    }

    pub fn size_fmt(&self) -> String { format_size(self.total_len()) }
}

// Non-empty, relative, and free of `..`, `.` or root components.
fn is_plain_name(name: &str) -> bool {
    let path = Path::new(name);
    path.components().next().is_some()
        && path.components().all(|c| matches!(c, Component::Normal(_)))
}

// SHA1 of the bencoded info dict. Dictionary keys are re-encoded in sorted order.
fn info_hash(info: &Value) -> Result<ID> {
    let mut hasher = sha1::Sha1::new();
    hasher.update(serde_bencode::to_bytes(info)?);
    Ok(hasher.finalize().into())
}

fn format_size(bytes: u64) -> String {
    let mut size = bytes as f64;
    let mut unit = "B";
    for next in ["KiB", "MiB", "GiB", "TiB"] {
        if size <= 1024.0 {
            break;
        }
        size /= 1024.0;
        unit = next;
    }
    format!("{:.2} {}", size, unit)
}

impl std::fmt::Debug for MetaInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetaInfo")
            .field("announce", &self.announce.as_str())
            .field("info", &self.info)
            .field("info_hash", &self.info_hash_hex())
            .field("encoding", &self.encoding)
            .field("creation_date", &self.creation_date)
            .field("comment", &self.comment)
            .field("created_by", &self.created_by)
            .finish()
    }
}

// Dont want to print out the pieces field, so we implement Debug manually.
impl std::fmt::Debug for Info {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Info")
            .field("name", &self.name)
            .field("num pieces", &(self.pieces.len() / 20))
            .field("piece_length", &self.piece_length)
            .field("md5sum", &self.md5sum)
            .field("length", &self.length)
            .field("files", &self.files)
            .field("private", &self.private)
            .finish()
    }
}
