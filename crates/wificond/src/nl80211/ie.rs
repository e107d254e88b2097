//! 802.11 information elements.
//!
//! An element is one id byte, one length byte, then `length` bytes of body.

use winnow::binary::le_u8;
use winnow::error::{ContextError, ErrMode};
use winnow::prelude::*;
use winnow::token::take;

use crate::netlink::{Error, Result};

/// Result type for winnow parsers.
type PResult<T> = core::result::Result<T, ErrMode<ContextError>>;

/// Element id of the SSID element.
pub const ELEMENT_ID_SSID: u8 = 0;

fn parse_element<'a>(input: &mut &'a [u8]) -> PResult<(u8, &'a [u8])> {
    let id = le_u8.parse_next(input)?;
    let len = le_u8.parse_next(input)? as usize;
    if input.len() < len {
        return Err(ErrMode::Cut(ContextError::new()));
    }
    let body: &[u8] = take(len).parse_next(input)?;
    Ok((id, body))
}

/// Iterator over `(id, body)` pairs.
///
/// Iteration continues while at least two bytes remain. An element whose
/// length runs past the buffer yields one error and ends iteration.
pub struct InfoElements<'a> {
    data: &'a [u8],
    failed: bool,
}

impl<'a> InfoElements<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            failed: false,
        }
    }
}

impl<'a> Iterator for InfoElements<'a> {
    type Item = Result<(u8, &'a [u8])>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.data.len() < 2 {
            return None;
        }
        let remaining = self.data.len();
        match parse_element(&mut self.data) {
            Ok(element) => Some(Ok(element)),
            Err(_) => {
                self.failed = true;
                Some(Err(Error::InvalidAttribute(format!(
                    "information element overruns buffer ({} bytes left)",
                    remaining
                ))))
            }
        }
    }
}

/// Extract the SSID from a raw information element blob.
///
/// A zero-length SSID element (hidden network) gives an empty SSID.
pub fn ssid_from_info_elements(ie: &[u8]) -> Result<Vec<u8>> {
    for element in InfoElements::new(ie) {
        let (id, body) = element?;
        if id == ELEMENT_ID_SSID {
            return Ok(body.to_vec());
        }
    }
    Err(Error::MissingAttribute("SSID information element"))
}
