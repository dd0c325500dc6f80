use crate::attributes::*;
use crate::message::*;
use shared::error::*;

use std::fmt;

const MAX_USERNAME_B: usize = 513;
const MAX_SOFTWARE_B: usize = 763;

/// Software is SOFTWARE attribute.
///
/// RFC 5389 Section 15.10
pub type Software = TextAttribute;

/// TextAttribute is helper for adding and getting text attributes.
#[derive(Clone, Default, Debug, PartialEq, Eq)]
pub struct TextAttribute {
    pub attr: AttrType,
    pub text: String,
}

impl fmt::Display for TextAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text)
    }
}

impl Setter for TextAttribute {
    /// add_to adds attribute with type t to m, checking maximum length.
    fn add_to(&self, m: &mut Message) -> Result<()> {
        let text = self.text.as_bytes();
        let max_len = match self.attr {
            ATTR_USERNAME => MAX_USERNAME_B,
            ATTR_SOFTWARE => MAX_SOFTWARE_B,
            _ => {
                return Err(Error::OtherStunErr(format!(
                    "unsupported text attribute {}",
                    self.attr
                )));
            }
        };

        if text.len() > max_len {
            return Err(Error::ErrAttributeSizeOverflow);
        }

        m.add(self.attr, text);
        Ok(())
    }
}

impl Getter for TextAttribute {
    fn get_from(&mut self, m: &Message) -> Result<()> {
        let attr = self.attr;
        *self = TextAttribute::get_from_as(m, attr)?;
        Ok(())
    }
}

impl TextAttribute {
    pub fn new(attr: AttrType, text: String) -> Self {
        TextAttribute { attr, text }
    }

    /// get_from_as gets t attribute from m and appends its value to reset v.
    pub fn get_from_as(m: &Message, attr: AttrType) -> Result<Self> {
        let text = m.get(attr)?;
        Ok(TextAttribute {
            attr,
            text: String::from_utf8_lossy(&text).into_owned(),
        })
    }
}
