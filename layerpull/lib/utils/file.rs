use std::path::Path;

use oci_spec::image::DigestAlgorithm;
use sha2::{Digest, Sha256, Sha384, Sha512};
use tokio::{fs::File, io::AsyncReadExt};

use crate::{LayerpullError, LayerpullResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const HASH_BUFFER_SIZE: usize = 64 * 1024;

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Gets the hash of a file, reading it in chunks.
pub async fn get_file_hash(path: &Path, algorithm: &DigestAlgorithm) -> LayerpullResult<Vec<u8>> {
    match algorithm {
        DigestAlgorithm::Sha256 => hash_file::<Sha256>(path).await,
        DigestAlgorithm::Sha384 => hash_file::<Sha384>(path).await,
        DigestAlgorithm::Sha512 => hash_file::<Sha512>(path).await,
        _ => Err(LayerpullError::InvalidDigest(format!(
            "unsupported algorithm: {algorithm}"
        ))),
    }
}

/// Returns the `sha256:<hex>` digest string of the given bytes.
pub fn sha256_digest(bytes: impl AsRef<[u8]>) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(bytes.as_ref())))
}

async fn hash_file<D: Digest>(path: &Path) -> LayerpullResult<Vec<u8>> {
    let mut file = File::open(path).await?;
    let mut hasher = D::new();
    let mut buffer = vec![0u8; HASH_BUFFER_SIZE];

    loop {
        let n = file.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hasher.finalize().to_vec())
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
