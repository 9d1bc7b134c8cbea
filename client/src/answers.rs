// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Shapes raw answer records into caller-friendly values.

use std::net::{Ipv4Addr, Ipv6Addr};

use hickory_proto::rr::{RData, Record};

/// An address record paired with its TTL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordWithTtl<T> {
    pub address: T,
    pub ttl: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MxRecord {
    pub priority: u16,
    pub exchange: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoaRecord {
    pub nsname: String,
    pub hostmaster: String,
    pub serial: u32,
    pub refresh: i32,
    pub retry: i32,
    pub expire: i32,
    pub minttl: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrvRecord {
    pub name: String,
    pub port: u16,
    pub priority: u16,
    pub weight: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NaptrRecord {
    pub order: u16,
    pub preference: u16,
    pub flags: String,
    pub service: String,
    pub regexp: String,
    pub replacement: String,
}

pub(crate) fn to_ipv4(answers: &[Record]) -> Vec<Ipv4Addr> {
    answers
        .iter()
        .filter_map(|record| match record.data() {
            Some(RData::A(a)) => Some(a.0),
            _ => None,
        })
        .collect()
}

pub(crate) fn to_ipv4_with_ttl(answers: &[Record]) -> Vec<RecordWithTtl<Ipv4Addr>> {
    answers
        .iter()
        .filter_map(|record| match record.data() {
            Some(RData::A(a)) => Some(RecordWithTtl {
                address: a.0,
                ttl: record.ttl(),
            }),
            _ => None,
        })
        .collect()
}

pub(crate) fn to_ipv6(answers: &[Record]) -> Vec<Ipv6Addr> {
    answers
        .iter()
        .filter_map(|record| match record.data() {
            Some(RData::AAAA(aaaa)) => Some(aaaa.0),
            _ => None,
        })
        .collect()
}

pub(crate) fn to_ipv6_with_ttl(answers: &[Record]) -> Vec<RecordWithTtl<Ipv6Addr>> {
    answers
        .iter()
        .filter_map(|record| match record.data() {
            Some(RData::AAAA(aaaa)) => Some(RecordWithTtl {
                address: aaaa.0,
                ttl: record.ttl(),
            }),
            _ => None,
        })
        .collect()
}

/// Target names for CNAME/NS/PTR answers, without the trailing root label.
pub(crate) fn to_names(answers: &[Record]) -> Vec<String> {
    answers
        .iter()
        .filter_map(|record| match record.data() {
            Some(RData::CNAME(name)) => Some(display_name(&name.0)),
            Some(RData::NS(name)) => Some(display_name(&name.0)),
            Some(RData::PTR(name)) => Some(display_name(&name.0)),
            _ => None,
        })
        .collect()
}

pub(crate) fn to_mx(answers: &[Record]) -> Vec<MxRecord> {
    answers
        .iter()
        .filter_map(|record| match record.data() {
            Some(RData::MX(mx)) => Some(MxRecord {
                priority: mx.preference(),
                exchange: display_name(mx.exchange()),
            }),
            _ => None,
        })
        .collect()
}

pub(crate) fn to_soa(answers: &[Record]) -> Vec<SoaRecord> {
    answers
        .iter()
        .filter_map(|record| match record.data() {
            Some(RData::SOA(soa)) => Some(SoaRecord {
                nsname: display_name(soa.mname()),
                hostmaster: display_name(soa.rname()),
                serial: soa.serial(),
                refresh: soa.refresh(),
                retry: soa.retry(),
                expire: soa.expire(),
                minttl: soa.minimum(),
            }),
            _ => None,
        })
        .collect()
}

pub(crate) fn to_srv(answers: &[Record]) -> Vec<SrvRecord> {
    answers
        .iter()
        .filter_map(|record| match record.data() {
            Some(RData::SRV(srv)) => Some(SrvRecord {
                name: display_name(srv.target()),
                port: srv.port(),
                priority: srv.priority(),
                weight: srv.weight(),
            }),
            _ => None,
        })
        .collect()
}

pub(crate) fn to_naptr(answers: &[Record]) -> Vec<NaptrRecord> {
    answers
        .iter()
        .filter_map(|record| match record.data() {
            Some(RData::NAPTR(naptr)) => Some(NaptrRecord {
                order: naptr.order(),
                preference: naptr.preference(),
                flags: String::from_utf8_lossy(naptr.flags()).into_owned(),
                service: String::from_utf8_lossy(naptr.services()).into_owned(),
                regexp: String::from_utf8_lossy(naptr.regexp()).into_owned(),
                replacement: display_name(naptr.replacement()),
            }),
            _ => None,
        })
        .collect()
}

/// One entry per TXT answer, one string per character-string segment.
pub(crate) fn to_txt(answers: &[Record]) -> Vec<Vec<String>> {
    answers
        .iter()
        .filter_map(|record| match record.data() {
            Some(RData::TXT(txt)) => Some(
                txt.txt_data()
                    .iter()
                    .map(|segment| String::from_utf8_lossy(segment).into_owned())
                    .collect(),
            ),
            _ => None,
        })
        .collect()
}

fn display_name(name: &hickory_proto::rr::Name) -> String {
    let mut s = name.to_utf8();
    if s.len() > 1 && s.ends_with('.') {
        s.pop();
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_proto::rr::rdata::{self, MX, SOA, SRV, TXT};
    use hickory_proto::rr::{Name, RData, Record};
    use std::str::FromStr;

    fn record(rdata: RData, ttl: u32) -> Record {
        Record::from_rdata(Name::from_str("example.com.").unwrap(), ttl, rdata)
    }

    #[test]
    fn shapes_addresses() {
        let answers = vec![
            record(RData::A(rdata::A(Ipv4Addr::new(93, 184, 216, 34))), 300),
            record(RData::AAAA(rdata::AAAA("2606:2800:220:1::1".parse().unwrap())), 60),
        ];

        assert_eq!(to_ipv4(&answers), vec![Ipv4Addr::new(93, 184, 216, 34)]);
        assert_eq!(
            to_ipv4_with_ttl(&answers),
            vec![RecordWithTtl {
                address: Ipv4Addr::new(93, 184, 216, 34),
                ttl: 300
            }]
        );
        assert_eq!(to_ipv6(&answers).len(), 1);
        assert_eq!(to_ipv6_with_ttl(&answers)[0].ttl, 60);
    }

    #[test]
    fn shapes_mx() {
        let answers = vec![record(
            RData::MX(MX::new(10, Name::from_str("mail.example.com.").unwrap())),
            300,
        )];

        assert_eq!(
            to_mx(&answers),
            vec![MxRecord {
                priority: 10,
                exchange: "mail.example.com".into()
            }]
        );
    }

    #[test]
    fn shapes_soa() {
        let soa = SOA::new(
            Name::from_str("ns.example.com.").unwrap(),
            Name::from_str("hostmaster.example.com.").unwrap(),
            2024010101,
            7200,
            900,
            1209600,
            86400,
        );
        let answers = vec![record(RData::SOA(soa), 300)];
        let shaped = to_soa(&answers);

        assert_eq!(shaped[0].nsname, "ns.example.com");
        assert_eq!(shaped[0].hostmaster, "hostmaster.example.com");
        assert_eq!(shaped[0].serial, 2024010101);
        assert_eq!(shaped[0].minttl, 86400);
    }

    #[test]
    fn shapes_srv_and_txt() {
        let answers = vec![
            record(
                RData::SRV(SRV::new(1, 5, 5060, Name::from_str("sip.example.com.").unwrap())),
                300,
            ),
            record(RData::TXT(TXT::new(vec!["v=spf1".into(), "-all".into()])), 300),
        ];

        assert_eq!(
            to_srv(&answers),
            vec![SrvRecord {
                name: "sip.example.com".into(),
                port: 5060,
                priority: 1,
                weight: 5
            }]
        );
        assert_eq!(to_txt(&answers), vec![vec!["v=spf1".to_string(), "-all".to_string()]]);
    }

    #[test]
    fn ignores_mismatched_rdata() {
        let answers = vec![record(RData::A(rdata::A(Ipv4Addr::LOCALHOST)), 300)];
        assert!(to_mx(&answers).is_empty());
        assert!(to_names(&answers).is_empty());
    }
}
