use std::{fmt, net::Ipv4Addr};

use thiserror::Error;

const BEGIN: &str = "# BEGIN";
const END: &str = "# END";
const HIGH_WATER: &str = "# LastPeerAddress";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("line {line}: block `{id}` is never closed")]
    Unterminated { id: String, line: usize },
    #[error("line {line}: `END {id}` without a matching BEGIN")]
    UnexpectedEnd { id: String, line: usize },
    #[error("line {line}: block `{id}` opened inside block `{outer}`")]
    Nested {
        id: String,
        outer: String,
        line: usize,
    },
    #[error("line {line}: peer `{id}` is declared twice")]
    Duplicate { id: String, line: usize },
    #[error("line {line}: invalid or repeated allocation mark")]
    HighWater { line: usize },
}

/// One `# BEGIN <id>` .. `# END <id>` region of an interface file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerBlock {
    pub id: String,
    pub public_key: Option<String>,
    pub address: Option<Ipv4Addr>,
    raw: String,
}

impl PeerBlock {
    fn new(id: &str, public_key: &str, address: Ipv4Addr) -> Self {
        Self {
            id: id.to_owned(),
            public_key: Some(public_key.to_owned()),
            address: Some(address),
            raw: format!(
                "{BEGIN} {id}
[Peer]
PublicKey = {public_key}
AllowedIPs = {address}/32
{END} {id}
"
            ),
        }
    }

    fn from_raw(id: String, raw: String) -> Self {
        let mut public_key = None;
        let mut address = None;

        for (key, value) in raw.lines().filter_map(key_value) {
            if key.eq_ignore_ascii_case("PublicKey") {
                public_key = Some(value.to_owned());
            } else if key.eq_ignore_ascii_case("AllowedIPs") {
                address = value
                    .split(',')
                    .find_map(|a| a.trim().split('/').next()?.parse().ok());
            }
        }

        Self {
            id,
            public_key,
            address,
            raw,
        }
    }

    pub fn is(&self, id: &str) -> bool {
        self.id.eq_ignore_ascii_case(id)
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Peer(PeerBlock),
    HighWater(Ipv4Addr),
}

/// Parsed interface file.
///
/// Text outside peer blocks is kept verbatim, so serializing an unmodified
/// file gives back the exact input (apart from the allocation mark, which is
/// normalized).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterfaceFile {
    segments: Vec<Segment>,
}

impl InterfaceFile {
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let mut segments = Vec::new();
        let mut pending = String::new();
        let mut block: Option<(String, String, usize)> = None;

        for (idx, line) in text.split_inclusive('\n').enumerate() {
            let lineno = idx + 1;

            if let Some((id, mut raw, start)) = block.take() {
                raw.push_str(line);
                if let Some(inner) = marker(line, BEGIN) {
                    return Err(ParseError::Nested {
                        id: inner.to_owned(),
                        outer: id,
                        line: lineno,
                    });
                }
                match marker(line, END) {
                    Some(end) if end.eq_ignore_ascii_case(&id) => {
                        let duplicate = segments
                            .iter()
                            .any(|s| matches!(s, Segment::Peer(p) if p.is(&id)));
                        if duplicate {
                            return Err(ParseError::Duplicate { id, line: start });
                        }
                        segments.push(Segment::Peer(PeerBlock::from_raw(id, raw)));
                    }
                    _ => block = Some((id, raw, start)),
                }
                continue;
            }

            if let Some(id) = marker(line, BEGIN) {
                flush(&mut segments, &mut pending);
                block = Some((id.to_owned(), line.to_owned(), lineno));
            } else if let Some(id) = marker(line, END) {
                return Err(ParseError::UnexpectedEnd {
                    id: id.to_owned(),
                    line: lineno,
                });
            } else if let Some(value) = line.trim().strip_prefix(HIGH_WATER) {
                let repeated = segments.iter().any(|s| matches!(s, Segment::HighWater(_)));
                let addr = value
                    .trim()
                    .strip_prefix('=')
                    .and_then(|v| v.trim().parse().ok())
                    .filter(|_| !repeated)
                    .ok_or(ParseError::HighWater { line: lineno })?;
                flush(&mut segments, &mut pending);
                segments.push(Segment::HighWater(addr));
            } else {
                pending.push_str(line);
            }
        }

        if let Some((id, _, line)) = block {
            return Err(ParseError::Unterminated { id, line });
        }
        flush(&mut segments, &mut pending);

        Ok(Self { segments })
    }

    /// Peer blocks in file order.
    pub fn peers(&self) -> impl Iterator<Item = &PeerBlock> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Peer(p) => Some(p),
            _ => None,
        })
    }

    pub fn peer(&self, id: &str) -> Option<&PeerBlock> {
        self.peers().find(|p| p.is(id))
    }

    pub fn contains_peer(&self, id: &str) -> bool {
        self.peer(id).is_some()
    }

    /// Looks up `key` in the `[Interface]` section.
    pub fn interface_value(&self, key: &str) -> Option<&str> {
        let mut in_interface = false;
        for segment in &self.segments {
            let Segment::Text(text) = segment else {
                continue;
            };
            for line in text.lines() {
                let line = line.trim();
                if line.starts_with('[') {
                    in_interface = line.eq_ignore_ascii_case("[Interface]");
                } else if in_interface {
                    match key_value(line) {
                        Some((k, v)) if k.eq_ignore_ascii_case(key) => return Some(v),
                        _ => {}
                    }
                }
            }
        }
        None
    }

    pub fn high_water(&self) -> Option<Ipv4Addr> {
        self.segments.iter().find_map(|s| match s {
            Segment::HighWater(a) => Some(*a),
            _ => None,
        })
    }

    /// Records `addr` as the highest allocated address.
    ///
    /// A file without a mark gets one right before its first peer block.
    pub fn set_high_water(&mut self, addr: Ipv4Addr) {
        for segment in &mut self.segments {
            if let Segment::HighWater(a) = segment {
                *a = addr;
                return;
            }
        }

        let pos = self
            .segments
            .iter()
            .position(|s| matches!(s, Segment::Peer(_)))
            .unwrap_or(self.segments.len());
        self.terminate_line(pos);
        self.segments.insert(pos, Segment::HighWater(addr));
    }

    /// Appends a new peer block after every existing one, separated by a
    /// blank line.
    pub fn append_peer(&mut self, id: &str, public_key: &str, address: Ipv4Addr) {
        let len = self.segments.len();
        self.terminate_line(len);

        let separated = match self.segments.last() {
            None => true,
            Some(Segment::Text(t)) => t.ends_with("\n\n") || t == "\n",
            Some(_) => false,
        };
        if !separated {
            self.segments.push(Segment::Text("\n".to_owned()));
        }

        self.segments
            .push(Segment::Peer(PeerBlock::new(id, public_key, address)));
    }

    /// Removes the block for `id` and the blank line that separated it from
    /// the previous segment.
    pub fn remove_peer(&mut self, id: &str) -> Option<PeerBlock> {
        let pos = self
            .segments
            .iter()
            .position(|s| matches!(s, Segment::Peer(p) if p.is(id)))?;
        let Segment::Peer(block) = self.segments.remove(pos) else {
            return None;
        };

        let emptied = match pos.checked_sub(1).and_then(|p| self.segments.get_mut(p)) {
            Some(Segment::Text(prev)) => {
                if prev.ends_with("\n\n") || prev == "\n" {
                    prev.pop();
                }
                prev.is_empty()
            }
            _ => false,
        };
        if emptied {
            self.segments.remove(pos - 1);
        }

        Some(block)
    }

    /// Makes sure the text before segment `pos` ends with a newline.
    fn terminate_line(&mut self, pos: usize) {
        if let Some(Segment::Text(prev)) = pos.checked_sub(1).and_then(|p| self.segments.get_mut(p)) {
            if !prev.is_empty() && !prev.ends_with('\n') {
                prev.push('\n');
            }
        }
    }
}

impl fmt::Display for InterfaceFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.segments {
            match segment {
                Segment::Text(t) => f.write_str(t)?,
                Segment::Peer(p) => f.write_str(&p.raw)?,
                Segment::HighWater(a) => writeln!(f, "{HIGH_WATER} = {a}")?,
            }
        }
        Ok(())
    }
}

fn flush(segments: &mut Vec<Segment>, pending: &mut String) {
    if !pending.is_empty() {
        segments.push(Segment::Text(std::mem::take(pending)));
    }
}

fn marker<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = line.trim().strip_prefix(prefix)?;
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    Some(rest.trim()).filter(|id| !id.is_empty())
}

pub(crate) fn key_value(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();
    if line.starts_with('#') {
        return None;
    }
    let (k, v) = line.split_once('=')?;
    Some((k.trim(), v.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "[Interface]
Address = 10.0.0.1/24
PrivateKey = c2VydmVy
ListenPort = 51820
";

    const TWO_PEERS: &str = "[Interface]
Address = 10.0.0.1/24
PrivateKey = c2VydmVy
ListenPort = 51820
# LastPeerAddress = 10.0.0.3

# BEGIN alice
[Peer]
PublicKey = YWxpY2U=
AllowedIPs = 10.0.0.2/32
# END alice

# BEGIN bob
[Peer]
PublicKey = Ym9i
AllowedIPs = 10.0.0.3/32
# END bob
";

    #[test]
    fn roundtrip_keeps_text() {
        let file = InterfaceFile::parse(TWO_PEERS).unwrap();
        assert_eq!(file.to_string(), TWO_PEERS);

        let file = InterfaceFile::parse(HEADER).unwrap();
        assert_eq!(file.to_string(), HEADER);
    }

    #[test]
    fn parses_peers_in_order() {
        let file = InterfaceFile::parse(TWO_PEERS).unwrap();
        let peers: Vec<_> = file.peers().collect();

        assert_eq!(peers.len(), 2);
        assert_eq!(peers[0].id, "alice");
        assert_eq!(peers[0].public_key.as_deref(), Some("YWxpY2U="));
        assert_eq!(peers[0].address, Some(Ipv4Addr::new(10, 0, 0, 2)));
        assert_eq!(peers[1].id, "bob");
        assert_eq!(file.high_water(), Some(Ipv4Addr::new(10, 0, 0, 3)));
    }

    #[test]
    fn interface_values_skip_peer_sections() {
        let file = InterfaceFile::parse(TWO_PEERS).unwrap();

        assert_eq!(file.interface_value("ListenPort"), Some("51820"));
        assert_eq!(file.interface_value("address"), Some("10.0.0.1/24"));
        assert_eq!(file.interface_value("PublicKey"), None);
    }

    #[test]
    fn lookup_is_case_insensitive_and_exact() {
        let file = InterfaceFile::parse(TWO_PEERS).unwrap();

        assert!(file.contains_peer("ALICE"));
        assert!(file.contains_peer("Bob"));
        assert!(!file.contains_peer("bo"));
        assert!(!file.contains_peer("bobby"));
    }

    #[test]
    fn remove_keeps_other_blocks() {
        let mut file = InterfaceFile::parse(TWO_PEERS).unwrap();
        let bob = file.peer("bob").unwrap().raw().to_owned();

        let removed = file.remove_peer("Alice").unwrap();
        assert_eq!(removed.id, "alice");

        let text = file.to_string();
        assert!(!text.contains("alice"));
        assert!(text.contains(&bob));
        assert!(text.starts_with(HEADER));
        assert!(file.remove_peer("alice").is_none());
    }

    #[test]
    fn remove_last_block_drops_separator() {
        let mut file = InterfaceFile::parse(TWO_PEERS).unwrap();
        file.remove_peer("bob");

        assert!(file.to_string().ends_with("# END alice\n"));
    }

    #[test]
    fn append_then_remove_restores_file() {
        let mut file = InterfaceFile::parse(TWO_PEERS).unwrap();
        file.append_peer("carol", "Y2Fyb2w=", Ipv4Addr::new(10, 0, 0, 4));

        let text = file.to_string();
        assert!(text.ends_with(
            "# END bob

# BEGIN carol
[Peer]
PublicKey = Y2Fyb2w=
AllowedIPs = 10.0.0.4/32
# END carol
"
        ));

        let reparsed = InterfaceFile::parse(&text).unwrap();
        assert_eq!(
            reparsed.peer("carol").unwrap().address,
            Some(Ipv4Addr::new(10, 0, 0, 4))
        );

        file.remove_peer("carol");
        assert_eq!(file.to_string(), TWO_PEERS);
    }

    #[test]
    fn append_fixes_missing_newline() {
        let mut file = InterfaceFile::parse("[Interface]\nListenPort = 1").unwrap();
        file.append_peer("a", "a2V5", Ipv4Addr::new(10, 0, 0, 2));

        assert!(file
            .to_string()
            .starts_with("[Interface]\nListenPort = 1\n\n# BEGIN a\n"));
    }

    #[test]
    fn high_water_goes_before_peers() {
        let mut file = InterfaceFile::parse(HEADER).unwrap();
        file.set_high_water(Ipv4Addr::new(10, 0, 0, 2));
        file.append_peer("alice", "YWxpY2U=", Ipv4Addr::new(10, 0, 0, 2));
        file.set_high_water(Ipv4Addr::new(10, 0, 0, 3));

        let text = file.to_string();
        assert!(text.starts_with(&format!("{HEADER}# LastPeerAddress = 10.0.0.3\n\n# BEGIN")));
        assert_eq!(text.matches("LastPeerAddress").count(), 1);
    }

    #[test]
    fn rejects_broken_blocks() {
        let unterminated = format!("{HEADER}# BEGIN alice\n[Peer]\n");
        assert_eq!(
            InterfaceFile::parse(&unterminated),
            Err(ParseError::Unterminated {
                id: "alice".to_owned(),
                line: 5
            })
        );

        let stray = format!("{HEADER}# END alice\n");
        assert!(matches!(
            InterfaceFile::parse(&stray),
            Err(ParseError::UnexpectedEnd { .. })
        ));

        let duplicate = format!("{HEADER}# BEGIN a\n# END a\n# BEGIN A\n# END A\n");
        assert!(matches!(
            InterfaceFile::parse(&duplicate),
            Err(ParseError::Duplicate { .. })
        ));

        let marks = format!(
            "{HEADER}# LastPeerAddress = 10.0.0.3\n# LastPeerAddress = 10.0.0.9\n"
        );
        assert_eq!(
            InterfaceFile::parse(&marks),
            Err(ParseError::HighWater { line: 6 })
        );

        let nested = format!("{HEADER}# BEGIN a\n# BEGIN b\n# END b\n# END a\n");
        assert!(matches!(
            InterfaceFile::parse(&nested),
            Err(ParseError::Nested { .. })
        ));
    }

    #[test]
    fn end_marker_matches_whole_id() {
        let text = format!("{HEADER}# BEGIN bob\n# END bobby\n# END bob\n");
        let file = InterfaceFile::parse(&text).unwrap();

        assert_eq!(file.peers().count(), 1);
        assert!(file.peer("bob").unwrap().raw().contains("# END bobby"));
    }
}
