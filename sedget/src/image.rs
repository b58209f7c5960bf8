//! Building, sealing and inspecting firmware images on the host.

use sedget_spec::mmu::PAGE_SIZE;
use sedget_spec::{FirmwareHeader, CIPHER_BLOCK_LEN, FW_HEADER_LEN};
use sedget_ta::auth;
use sedget_ta::mmu::FirmwareLayout;
use sedget_ta::FirmwareKey;
use serde::Serialize;

use crate::error::SedgetError;

/// Zero-pad `buf` to a whole number of cipher blocks.
pub fn pad_to_block(buf: &mut Vec<u8>) {
    let rem = buf.len() % CIPHER_BLOCK_LEN;
    if rem != 0 {
        buf.resize(buf.len() + CIPHER_BLOCK_LEN - rem, 0);
    }
}

/// Assembles a plaintext image: header, body, then zero padding out to the
/// declared text length and the cipher block size.
#[derive(Clone, Debug)]
pub struct ImageBuilder {
    header: FirmwareHeader,
    body: Vec<u8>,
}

impl ImageBuilder {
    /// Start an image with `header` and an empty body.
    pub fn new(header: FirmwareHeader) -> Self {
        Self {
            header,
            body: Vec::new(),
        }
    }

    /// Bytes following the header.
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Header the image starts with.
    pub fn header(&self) -> &FirmwareHeader {
        &self.header
    }

    /// The unsealed image bytes.
    pub fn plaintext(&self) -> Vec<u8> {
        let mut image = Vec::with_capacity(FW_HEADER_LEN + self.body.len());
        image.extend_from_slice(&self.header.to_bytes());
        image.extend_from_slice(&self.body);
        let text_len = self.header.text_length as usize;
        if image.len() < text_len {
            image.resize(text_len, 0);
        }
        pad_to_block(&mut image);
        image
    }

    /// Plaintext with its digest appended, encrypted under `key`.
    pub fn seal(&self, key: &FirmwareKey) -> Result<Vec<u8>, SedgetError> {
        Ok(auth::seal(key, &self.plaintext())?)
    }
}

/// What a sealed image declares about itself.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[allow(missing_docs)]
pub struct ImageReport {
    pub sealed_len: usize,
    /// Image length without the signature.
    pub plaintext_len: usize,
    /// `major.minor` protocol version.
    pub protocol: String,
    pub info: String,
    pub version: String,
    pub text_length: u32,
    pub bss_start_address: u32,
    pub bss_bitmap_size: u32,
    pub master_rw_start_address: u32,
    pub master_rw_size: u32,
    pub num_pages: usize,
    pub num_text_pages: usize,
    pub num_shared_pages: usize,
    /// Private pages per core.
    pub num_bss_pages: usize,
}

impl ImageReport {
    /// Bytes of the protected buffer needed to load the image on `ncores`
    /// cores: image, pools and one table page per core.
    pub fn required_buffer(&self, ncores: usize) -> usize {
        (self.num_pages + self.num_shared_pages + (self.num_bss_pages + 1) * ncores) * PAGE_SIZE
    }
}

/// Decrypt and verify `sealed` with `key`, then describe its layout.
pub fn inspect(key: &FirmwareKey, sealed: &[u8]) -> Result<ImageReport, SedgetError> {
    let mut buf = sealed.to_vec();
    let plaintext_len = auth::decrypt_in_place(key, &mut buf)?;
    let layout = FirmwareLayout::scan(&buf[..plaintext_len])?;
    let header = &layout.header;

    Ok(ImageReport {
        sealed_len: sealed.len(),
        plaintext_len,
        protocol: format!("{}.{}", header.protocol_major, header.protocol_minor),
        info: header.info(),
        version: header.version(),
        text_length: header.text_length,
        bss_start_address: header.bss_start_address,
        bss_bitmap_size: header.bss_bitmap_size,
        master_rw_start_address: header.master_rw_start_address,
        master_rw_size: header.master_rw_size,
        num_pages: layout.num_pages,
        num_text_pages: layout.num_text_pages,
        num_shared_pages: layout.num_shared_pages,
        num_bss_pages: layout.num_bss_pages,
    })
}
