//! Parsing of RISwhois data sets.
//!
//! These datasets provide the originating AS numbers for address prefixes
//! as encountered in BGP data collected by RIS, together with the number
//! of RIS peers that have seen each pair.

use std::io;
use std::str::FromStr;
use log::debug;
use crate::api::bgp::BgpRisEntry;
use crate::api::resources::{parse_asn, TypedPrefix};


/// Parses the raw data of a RISwhois dump.
///
/// The IPv4 and IPv6 dumps use the same format. Lines that cannot be
/// parsed are skipped. Filtering by visibility is left to the
/// announcement index.
pub fn parse_data(data: impl io::BufRead) -> Result<Vec<BgpRisEntry>, io::Error> {
    let mut res = Vec::new();
    for line in data.lines() {
        // Each line is as follows:
        //
        //    o  empty lines and lines starting with % are ignored.
        //    o  all other lines consist of three string separated by
        //       white space (technically: a single HTAB):
        //
        //          o  origin AS number as an integer,
        //          o  prefix as IP address slash prefix length,
        //          o  number of peers that have seen this pair.
        //
        //       Instead of the origin AS number, there may be an AS set
        //       as a sequence of comma separated AS numbers surrounded by
        //       curly braces. We ignore those.
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('%') {
            continue;
        }

        match parse_line(line) {
            Some(entry) => res.push(entry),
            None => debug!("Skipping unparseable RISwhois line: {}", line),
        }
    }
    Ok(res)
}

/// Parses data from a string.
pub fn parse_str(data: &str) -> Vec<BgpRisEntry> {
    // Reading from a byte slice cannot fail.
    parse_data(data.as_bytes()).unwrap_or_default()
}

fn parse_line(line: &str) -> Option<BgpRisEntry> {
    let mut values = line.split_whitespace();
    let asn_str = values.next()?;
    let prefix_str = values.next()?;
    let peers = values.next()?;

    if asn_str.contains('{') {
        return None
    }

    Some(BgpRisEntry::new(
        parse_asn(asn_str).ok()?,
        TypedPrefix::from_str(prefix_str).ok()?,
        u32::from_str(peers).ok()?,
    ))
}


//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use rpki::repository::resources::Asn;
    use super::*;

    fn entry(asn: u32, prefix: &str, visibility: u32) -> BgpRisEntry {
        BgpRisEntry::new(
            Asn::from_u32(asn),
            TypedPrefix::from_str(prefix).unwrap(),
            visibility,
        )
    }

    #[test]
    fn parse_empty() {
        assert!(parse_str("").is_empty());
        assert!(parse_str("% comment only\n\n").is_empty());
    }

    #[test]
    fn parse_ipv4() {
        let data = "% This is RIPE NCC's Routing Information Service\n\
                    \n\
                    13335\t1.0.0.0/24\t405\n\
                    38803\t1.0.4.0/22\t344\n";
        assert_eq!(
            parse_str(data),
            vec![
                entry(13335, "1.0.0.0/24", 405),
                entry(38803, "1.0.4.0/22", 344),
            ]
        );
    }

    #[test]
    fn parse_ipv6() {
        let data = "6939\t2001:470::/32\t380\n\
                    6939\t::216.66.38.58/128\t1\n";
        let entries = parse_str(data);
        assert_eq!(
            entries,
            vec![
                entry(6939, "2001:470::/32", 380),
                entry(6939, "::216.66.38.58/128", 1),
            ]
        );
        assert!(matches!(entries[1].prefix, TypedPrefix::V6(_)));
    }

    #[test]
    fn skip_malformed() {
        let data = "{3333,1103}\t193.0.0.0/21\t20\n\
                    3333\t193.0.0.1/21\t20\n\
                    3333\t193.0.0.0/21\n\
                    3333\tnot-a-prefix\t20\n\
                    3333\t193.0.0.0/21\tmany\n\
                    3333\t193.0.0.0/21\t20\n";
        assert_eq!(parse_str(data), vec![entry(3333, "193.0.0.0/21", 20)]);
    }
}
