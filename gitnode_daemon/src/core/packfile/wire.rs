//! Minimal git smart-protocol pkt-line framing, just enough to decode the
//! reference-update request that precedes a push's packfile (spec.md §4.7
//! step 2). The transport that delivers these bytes to us is an external
//! collaborator (spec.md §1); only the wire format itself needs decoding
//! here.

use gitnode_common::crypto::GitOid;

use crate::core::error::PackfileError;

pub const FLUSH_PKT: &[u8] = b"0000";

/// `(name, oldHash, newHash)` — one pushed reference command (spec.md §3,
/// §4.7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefCommand {
    pub name: String,
    pub old_hash: GitOid,
    pub new_hash: GitOid,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceUpdateRequest {
    pub commands: Vec<RefCommand>,
    /// Capabilities advertised on the first command line (`report-status`,
    /// `side-band-64k`, ...); recorded but not acted on since the transport
    /// that negotiates them is an external collaborator.
    pub capabilities: Vec<String>,
}

/// Reads one pkt-line's payload. Returns `None` on a flush packet (`0000`).
fn read_pkt_line(buf: &[u8], offset: &mut usize) -> Result<Option<Vec<u8>>, PackfileError> {
    if *offset + 4 > buf.len() {
        return Err(PackfileError::MalformedReferenceUpdateRequest("truncated pkt-line length".into()));
    }
    let len_hex = std::str::from_utf8(&buf[*offset..*offset + 4])
        .map_err(|_| PackfileError::MalformedReferenceUpdateRequest("non-ascii pkt-line length".into()))?;
    let len = usize::from_str_radix(len_hex, 16)
        .map_err(|_| PackfileError::MalformedReferenceUpdateRequest("invalid pkt-line length".into()))?;

    if len == 0 {
        *offset += 4;
        return Ok(None);
    }
    if len < 4 || *offset + len > buf.len() {
        return Err(PackfileError::MalformedReferenceUpdateRequest("pkt-line length out of range".into()));
    }
    let payload = buf[*offset + 4..*offset + len].to_vec();
    *offset += len;
    Ok(Some(payload))
}

/// Decodes the reference-update request prelude from the start of `buf`,
/// returning the request and the offset of the first byte after it (where
/// the packfile, if any, begins).
pub fn decode_reference_update_request(
    buf: &[u8],
) -> Result<(ReferenceUpdateRequest, usize), PackfileError> {
    let mut offset = 0;
    let mut commands = Vec::new();
    let mut capabilities = Vec::new();
    let mut first = true;

    loop {
        let Some(line) = read_pkt_line(buf, &mut offset)? else { break };
        let mut line = line.as_slice();
        if line.last() == Some(&b'\n') {
            line = &line[..line.len() - 1];
        }

        let mut rest = line;
        if first {
            if let Some(nul) = line.iter().position(|b| *b == 0) {
                capabilities = String::from_utf8_lossy(&line[nul + 1..])
                    .split(' ')
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect();
                rest = &line[..nul];
            }
            first = false;
        }

        let text = std::str::from_utf8(rest)
            .map_err(|_| PackfileError::MalformedReferenceUpdateRequest("non-utf8 command line".into()))?;
        let mut parts = text.splitn(3, ' ');
        let (old, new, name) = match (parts.next(), parts.next(), parts.next()) {
            (Some(o), Some(n), Some(r)) => (o, n, r),
            _ => {
                return Err(PackfileError::MalformedReferenceUpdateRequest(format!(
                    "expected '<old> <new> <ref>', got {text:?}"
                )))
            }
        };

        let old_hash = GitOid::from_hex(old)
            .map_err(|_| PackfileError::MalformedReferenceUpdateRequest("invalid old hash".into()))?;
        let new_hash = GitOid::from_hex(new)
            .map_err(|_| PackfileError::MalformedReferenceUpdateRequest("invalid new hash".into()))?;

        commands.push(RefCommand { name: name.to_string(), old_hash, new_hash });
    }

    Ok((ReferenceUpdateRequest { commands, capabilities }, offset))
}

fn encode_pkt_line(out: &mut Vec<u8>, payload: &[u8]) {
    let len = payload.len() + 4;
    out.extend_from_slice(format!("{len:04x}").as_bytes());
    out.extend_from_slice(payload);
}

/// Re-encodes a reference-update request for replay (spec.md §4.11
/// "Packfile builder" / §2 "Builds reference-update request packfile from a
/// note for replay").
pub fn encode_reference_update_request(request: &ReferenceUpdateRequest) -> Vec<u8> {
    let mut out = Vec::new();
    for (i, cmd) in request.commands.iter().enumerate() {
        let mut line = format!("{} {} {}", cmd.old_hash.to_hex(), cmd.new_hash.to_hex(), cmd.name);
        if i == 0 && !request.capabilities.is_empty() {
            line.push('\0');
            line.push_str(&request.capabilities.join(" "));
        }
        line.push('\n');
        encode_pkt_line(&mut out, line.as_bytes());
    }
    out.extend_from_slice(FLUSH_PKT);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oid(byte: u8) -> GitOid {
        GitOid::new([byte; 20])
    }

    #[test]
    fn decodes_single_command_with_capabilities() {
        let line = format!(
            "{} {} refs/heads/main\0report-status side-band-64k\n",
            GitOid::zero().to_hex(),
            oid(1).to_hex()
        );
        let mut buf = Vec::new();
        encode_pkt_line(&mut buf, line.as_bytes());
        buf.extend_from_slice(FLUSH_PKT);

        let (request, consumed) = decode_reference_update_request(&buf).unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(request.commands.len(), 1);
        assert_eq!(request.commands[0].name, "refs/heads/main");
        assert!(request.capabilities.contains(&"report-status".to_string()));
    }

    #[test]
    fn deletion_command_has_zero_new_hash() {
        let line = format!("{} {} refs/heads/gone\n", oid(1).to_hex(), GitOid::zero().to_hex());
        let mut buf = Vec::new();
        encode_pkt_line(&mut buf, line.as_bytes());
        buf.extend_from_slice(FLUSH_PKT);

        let (request, _) = decode_reference_update_request(&buf).unwrap();
        assert!(request.commands[0].new_hash.is_zero());
    }

    #[test]
    fn round_trips_through_encode() {
        let request = ReferenceUpdateRequest {
            commands: vec![RefCommand { name: "refs/heads/main".into(), old_hash: oid(1), new_hash: oid(2) }],
            capabilities: vec![],
        };
        let bytes = encode_reference_update_request(&request);
        let (decoded, _) = decode_reference_update_request(&bytes).unwrap();
        assert_eq!(decoded.commands, request.commands);
    }
}
