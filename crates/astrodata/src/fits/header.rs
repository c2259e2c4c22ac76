//! Header cards and the ordered keyword record built from them.

use crate::error::{Error, Result};
use crate::fits::value::{format_value_field, parse_value_field, Value};
use crate::fits::{BLOCK_SIZE, CARDS_PER_BLOCK, CARD_SIZE};

/// One keyword record: keyword, optional value and optional comment.
#[derive(Debug, Clone, PartialEq)]
pub struct Card {
    /// Keyword name, without trailing blanks.
    pub keyword: String,
    /// The value, absent for commentary cards and undefined values.
    pub value: Option<Value>,
    /// Inline comment, or the free text of a commentary card.
    pub comment: Option<String>,
}

impl Card {
    /// A keyword/value card with no comment.
    pub fn new(keyword: &str, value: impl Into<Value>) -> Self {
        Card {
            keyword: keyword.to_string(),
            value: Some(value.into()),
            comment: None,
        }
    }

    /// A keyword/value card with an inline comment.
    pub fn with_comment(keyword: &str, value: impl Into<Value>, comment: &str) -> Self {
        Card {
            keyword: keyword.to_string(),
            value: Some(value.into()),
            comment: Some(comment.to_string()),
        }
    }

    /// Returns `true` for COMMENT, HISTORY and blank-keyword cards.
    pub fn is_commentary(&self) -> bool {
        is_commentary_keyword(&self.keyword)
    }
}

fn is_commentary_keyword(keyword: &str) -> bool {
    matches!(keyword, "COMMENT" | "HISTORY" | "")
}

/// Checks that `keyword` is a legal keyword: up to 8 characters drawn from
/// upper-case letters, digits, hyphen and underscore.
pub fn validate_keyword(keyword: &str) -> Result<()> {
    let legal = keyword.len() <= 8
        && keyword
            .bytes()
            .all(|b| matches!(b, b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_'));
    if legal {
        Ok(())
    } else {
        Err(Error::InvalidKeyword(keyword.to_string()))
    }
}

/// Keywords describing the layout of an extension rather than its content.
///
/// These are regenerated on write, so metadata records never carry them.
pub fn is_structural_keyword(keyword: &str) -> bool {
    const FIXED: [&str; 12] = [
        "SIMPLE", "EXTEND", "XTENSION", "BITPIX", "NAXIS", "PCOUNT", "GCOUNT", "GROUPS",
        "TFIELDS", "BSCALE", "BZERO", "END",
    ];
    const INDEXED: [&str; 10] = [
        "NAXIS", "TFORM", "TTYPE", "TUNIT", "TBCOL", "TDIM", "TNULL", "TSCAL", "TZERO", "TDISP",
    ];
    if FIXED.contains(&keyword) {
        return true;
    }
    INDEXED.iter().any(|prefix| {
        keyword
            .strip_prefix(prefix)
            .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
    })
}

/// An ordered keyword → (value, comment) record.
///
/// Keyword order is preserved and is the order cards are written in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Header {
    cards: Vec<Card>,
}

impl Header {
    /// An empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps an existing card list.
    pub fn from_cards(cards: Vec<Card>) -> Self {
        Header { cards }
    }

    /// All cards, in order.
    pub fn cards(&self) -> &[Card] {
        &self.cards
    }

    /// Consumes the record, returning its cards.
    pub fn into_cards(self) -> Vec<Card> {
        self.cards
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    /// The first card carrying `keyword`.
    pub fn card(&self, keyword: &str) -> Option<&Card> {
        self.cards.iter().find(|c| c.keyword == keyword)
    }

    /// `true` if any card carries `keyword`.
    pub fn contains(&self, keyword: &str) -> bool {
        self.card(keyword).is_some()
    }

    /// The value of `keyword`, if present and defined.
    pub fn get(&self, keyword: &str) -> Option<&Value> {
        self.card(keyword).and_then(|c| c.value.as_ref())
    }

    pub fn get_str(&self, keyword: &str) -> Option<&str> {
        self.get(keyword).and_then(Value::as_str)
    }

    pub fn get_int(&self, keyword: &str) -> Option<i64> {
        self.get(keyword).and_then(Value::as_int)
    }

    pub fn get_float(&self, keyword: &str) -> Option<f64> {
        self.get(keyword).and_then(Value::as_float)
    }

    /// The comment attached to `keyword`.
    pub fn comment(&self, keyword: &str) -> Option<&str> {
        self.card(keyword).and_then(|c| c.comment.as_deref())
    }

    /// Sets `keyword` to `value`.
    ///
    /// An existing card is updated in place and keeps its comment unless a new
    /// one is given; otherwise a card is appended.
    pub fn set(
        &mut self,
        keyword: &str,
        value: impl Into<Value>,
        comment: Option<&str>,
    ) -> Result<()> {
        validate_keyword(keyword)?;
        let value = value.into();
        match self.cards.iter_mut().find(|c| c.keyword == keyword) {
            Some(card) => {
                card.value = Some(value);
                if let Some(comment) = comment {
                    card.comment = Some(comment.to_string());
                }
            }
            None => self.cards.push(Card {
                keyword: keyword.to_string(),
                value: Some(value),
                comment: comment.map(str::to_string),
            }),
        }
        Ok(())
    }

    /// Replaces the comment of an existing keyword. Returns `false` if absent.
    pub fn set_comment(&mut self, keyword: &str, comment: &str) -> bool {
        match self.cards.iter_mut().find(|c| c.keyword == keyword) {
            Some(card) => {
                card.comment = Some(comment.to_string());
                true
            }
            None => false,
        }
    }

    /// Removes every card carrying `keyword`. Returns `true` if any was removed.
    pub fn remove(&mut self, keyword: &str) -> bool {
        let before = self.cards.len();
        self.cards.retain(|c| c.keyword != keyword);
        self.cards.len() != before
    }

    /// Appends a card without looking for an existing one (HISTORY, COMMENT).
    pub fn push(&mut self, card: Card) {
        self.cards.push(card);
    }

    /// Copies every card of `other` into this record, overwriting keywords
    /// already present. Commentary cards are appended.
    pub fn update(&mut self, other: &Header) {
        for card in &other.cards {
            match (&card.value, card.is_commentary()) {
                (Some(value), false) => {
                    match self.cards.iter_mut().find(|c| c.keyword == card.keyword) {
                        Some(existing) => {
                            existing.value = Some(value.clone());
                            existing.comment = card.comment.clone();
                        }
                        None => self.cards.push(card.clone()),
                    }
                }
                _ => self.cards.push(card.clone()),
            }
        }
    }

    /// Drops all structural keywords, plus `EXTNAME`/`EXTVER`.
    pub fn strip_structural(&mut self) {
        self.cards.retain(|c| {
            !is_structural_keyword(&c.keyword) && c.keyword != "EXTNAME" && c.keyword != "EXTVER"
        });
    }

    pub fn iter(&self) -> impl Iterator<Item = &Card> {
        self.cards.iter()
    }
}

impl<'a> IntoIterator for &'a Header {
    type Item = &'a Card;
    type IntoIter = std::slice::Iter<'a, Card>;

    fn into_iter(self) -> Self::IntoIter {
        self.cards.iter()
    }
}

// ── Parsing ──

/// Parse one 80-byte card image.
pub fn parse_card(bytes: &[u8]) -> Result<Card> {
    let text = std::str::from_utf8(bytes)
        .ok()
        .filter(|t| t.is_ascii() && t.len() == CARD_SIZE)
        .ok_or(Error::InvalidHeader("card is not 80 ASCII characters"))?;
    let keyword = text[..8].trim_end();
    if keyword.contains(' ') {
        return Err(Error::InvalidKeyword(keyword.to_string()));
    }
    validate_keyword(keyword)?;

    if keyword == "END" {
        return Ok(Card {
            keyword: keyword.to_string(),
            value: None,
            comment: None,
        });
    }

    if !is_commentary_keyword(keyword) && &text[8..10] == "= " {
        let (value, comment) = parse_value_field(&text[10..]);
        return Ok(Card {
            keyword: keyword.to_string(),
            value,
            comment,
        });
    }

    let free = text[8..].trim_end();
    Ok(Card {
        keyword: keyword.to_string(),
        value: None,
        comment: (!free.is_empty()).then(|| free.to_string()),
    })
}

/// Parse header blocks until the END card, returning the record and the
/// number of bytes it occupied (a multiple of the block size).
///
/// Only complete blocks are scanned.
pub fn parse_header(data: &[u8]) -> Result<(Header, usize)> {
    let mut cards = Vec::new();
    for (block_idx, block) in data.chunks_exact(BLOCK_SIZE).enumerate() {
        for raw in block.chunks_exact(CARD_SIZE) {
            let card = parse_card(raw)?;
            if card.keyword == "END" {
                return Ok((Header { cards }, (block_idx + 1) * BLOCK_SIZE));
            }
            // Blank padding cards between the last keyword and END carry nothing.
            if card.keyword.is_empty() && card.comment.is_none() {
                continue;
            }
            cards.push(card);
        }
    }
    Err(Error::UnexpectedEof)
}

// ── Writing ──

/// Render a card into its 80-byte image.
///
/// A value that does not fit is an error; an overlong comment is cut at the
/// card boundary.
pub fn format_card(card: &Card) -> Result<[u8; CARD_SIZE]> {
    validate_keyword(&card.keyword)?;
    let mut line = format!("{:<8}", card.keyword);
    match &card.value {
        Some(value) if !card.is_commentary() => {
            if let Value::String(s) = value {
                if !s.is_ascii() {
                    return Err(Error::InvalidValue("header strings must be ASCII"));
                }
            }
            line.push_str("= ");
            let field = format_value_field(value);
            if line.len() + field.trim_end().len() > CARD_SIZE {
                return Err(Error::InvalidValue("header value does not fit in one card"));
            }
            match &card.comment {
                Some(comment) => {
                    let used = field.trim_end().len().max(20);
                    line.push_str(&field[..used]);
                    line.push_str(" / ");
                    line.push_str(comment);
                }
                None => line.push_str(&field),
            }
        }
        _ => {
            if let Some(text) = &card.comment {
                line.push_str(text);
            }
        }
    }
    if !line.is_ascii() {
        return Err(Error::InvalidValue("header comments must be ASCII"));
    }
    let mut buf = [b' '; CARD_SIZE];
    let len = line.len().min(CARD_SIZE);
    buf[..len].copy_from_slice(&line.as_bytes()[..len]);
    Ok(buf)
}

/// Serialize cards into complete header blocks, appending END and padding
/// the last block with blanks.
pub fn serialize_header(cards: &[Card]) -> Result<Vec<u8>> {
    let total_cards = cards.len() + 1;
    let mut buf = Vec::with_capacity(total_cards.div_ceil(CARDS_PER_BLOCK) * BLOCK_SIZE);
    for card in cards {
        buf.extend_from_slice(&format_card(card)?);
    }
    let mut end = [b' '; CARD_SIZE];
    end[..3].copy_from_slice(b"END");
    buf.extend_from_slice(&end);
    buf.resize(total_cards.div_ceil(CARDS_PER_BLOCK) * BLOCK_SIZE, b' ');
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_card(s: &str) -> Vec<u8> {
        format!("{s:<80}").into_bytes()
    }

    #[test]
    fn parse_string_card() {
        let c = parse_card(&make_card("TELESCOP= 'Gemini-North'       / telescope name")).unwrap();
        assert_eq!(c.keyword, "TELESCOP");
        assert_eq!(c.value, Some(Value::String("Gemini-North".into())));
        assert_eq!(c.comment.as_deref(), Some("telescope name"));
    }

    #[test]
    fn parse_history_card_keeps_text() {
        let c = parse_card(&make_card("HISTORY flat-fielded = yes")).unwrap();
        assert!(c.is_commentary());
        assert!(c.value.is_none());
        assert_eq!(c.comment.as_deref(), Some("flat-fielded = yes"));
    }

    #[test]
    fn parse_rejects_lowercase_keyword() {
        assert!(matches!(
            parse_card(&make_card("bitpix  =                   16")),
            Err(Error::InvalidKeyword(_))
        ));
    }

    #[test]
    fn parse_hyphenated_keyword() {
        let c = parse_card(&make_card("DATE-OBS= '2024-01-15'")).unwrap();
        assert_eq!(c.keyword, "DATE-OBS");
    }

    #[test]
    fn header_round_trip_through_blocks() {
        let mut h = Header::new();
        h.set("OBJECT", "NGC 1234", Some("target")).unwrap();
        h.set("EXPTIME", 30.5, None).unwrap();
        h.set("NCOMBINE", 3i64, None).unwrap();
        h.push(Card {
            keyword: "HISTORY".into(),
            value: None,
            comment: Some("bias subtracted".into()),
        });
        let bytes = serialize_header(h.cards()).unwrap();
        assert_eq!(bytes.len(), BLOCK_SIZE);
        let (parsed, used) = parse_header(&bytes).unwrap();
        assert_eq!(used, BLOCK_SIZE);
        assert_eq!(parsed, h);
    }

    #[test]
    fn header_spanning_two_blocks() {
        let cards: Vec<Card> = (0..CARDS_PER_BLOCK)
            .map(|i| Card::new(&format!("KEY{i}"), i as i64))
            .collect();
        let bytes = serialize_header(&cards).unwrap();
        assert_eq!(bytes.len(), 2 * BLOCK_SIZE);
        let (parsed, used) = parse_header(&bytes).unwrap();
        assert_eq!(used, 2 * BLOCK_SIZE);
        assert_eq!(parsed.len(), CARDS_PER_BLOCK);
    }

    #[test]
    fn missing_end_card_is_eof() {
        let mut block = vec![b' '; BLOCK_SIZE];
        block[..80].copy_from_slice(&make_card("SIMPLE  =                    T"));
        assert!(matches!(parse_header(&block), Err(Error::UnexpectedEof)));
    }

    #[test]
    fn set_keeps_existing_comment_and_position() {
        let mut h = Header::new();
        h.set("GAIN", 1.0, Some("e-/ADU")).unwrap();
        h.set("RDNOISE", 3.0, None).unwrap();
        h.set("GAIN", 2.0, None).unwrap();
        assert_eq!(h.cards()[0].keyword, "GAIN");
        assert_eq!(h.get_float("GAIN"), Some(2.0));
        assert_eq!(h.comment("GAIN"), Some("e-/ADU"));
    }

    #[test]
    fn set_rejects_bad_keyword() {
        let mut h = Header::new();
        assert!(h.set("toolongkeyword", 1i64, None).is_err());
        assert!(h.set("lower", 1i64, None).is_err());
    }

    #[test]
    fn strip_structural_keeps_content() {
        let mut h = Header::from_cards(vec![
            Card::new("XTENSION", "IMAGE"),
            Card::new("BITPIX", -32i64),
            Card::new("NAXIS", 2i64),
            Card::new("NAXIS1", 10i64),
            Card::new("EXTNAME", "SCI"),
            Card::new("EXTVER", 1i64),
            Card::new("TUNIT3", "deg"),
            Card::new("GAIN", 2.0),
            Card::new("NAXISX", 1i64),
        ]);
        h.strip_structural();
        let kws: Vec<_> = h.iter().map(|c| c.keyword.as_str()).collect();
        assert_eq!(kws, ["GAIN", "NAXISX"]);
    }

    #[test]
    fn overlong_value_is_rejected_and_comment_is_cut() {
        let fitting = Card::new("ORIGNAME", "n".repeat(68));
        let line = format_card(&fitting).unwrap();
        assert_eq!(line[79], b'\'');
        let quoted = Card::new("ORIGNAME", format!("{}'", "n".repeat(67)));
        assert!(matches!(format_card(&quoted), Err(Error::InvalidValue(_))));
        let long = Card::new("ORIGNAME", "n".repeat(69));
        assert!(matches!(format_card(&long), Err(Error::InvalidValue(_))));

        let mut h = Header::new();
        h.set("GAIN", 2.0, Some(&"c".repeat(100))).unwrap();
        let bytes = serialize_header(h.cards()).unwrap();
        let (parsed, _) = parse_header(&bytes).unwrap();
        assert_eq!(parsed.get_float("GAIN"), Some(2.0));
    }

    #[test]
    fn non_ascii_header_string_is_rejected() {
        let card = Card::new("OBSERVER", "Jörg");
        assert!(matches!(format_card(&card), Err(Error::InvalidValue(_))));
    }
}
