//! Static numeric-code to name tables for flow fields.
//!
//! Every table falls back to [`UNKNOWN`] for codes it does not list.

pub const UNKNOWN: &str = "unknown";

/// IANA protocol number to name
pub fn protocol_name(code: u32) -> &'static str {
    match code {
        0 => "HOPOPT",
        1 => "ICMP",
        2 => "IGMP",
        4 => "IPv4",
        6 => "TCP",
        8 => "EGP",
        9 => "IGP",
        17 => "UDP",
        27 => "RDP",
        41 => "IPv6",
        43 => "IPv6-Route",
        44 => "IPv6-Frag",
        46 => "RSVP",
        47 => "GRE",
        50 => "ESP",
        51 => "AH",
        58 => "IPv6-ICMP",
        59 => "IPv6-NoNxt",
        60 => "IPv6-Opts",
        88 => "EIGRP",
        89 => "OSPF",
        94 => "IPIP",
        103 => "PIM",
        112 => "VRRP",
        115 => "L2TP",
        132 => "SCTP",
        136 => "UDPLite",
        137 => "MPLS-in-IP",
        _ => UNKNOWN,
    }
}

/// EtherType to name
pub fn ether_type_name(code: u32) -> &'static str {
    match code {
        0x0800 => "IPv4",
        0x0806 => "ARP",
        0x8035 => "RARP",
        0x8100 => "VLAN",
        0x86DD => "IPv6",
        0x8809 => "LACP",
        0x8847 => "MPLS",
        0x8848 => "MPLS-Multicast",
        0x8863 => "PPPoE-Discovery",
        0x8864 => "PPPoE-Session",
        0x88A8 => "QinQ",
        0x88CC => "LLDP",
        0x88E5 => "MACsec",
        0x8906 => "FCoE",
        _ => UNKNOWN,
    }
}

/// Flow export type code to name
pub fn flow_type_name(code: u32) -> &'static str {
    match code {
        1 => "SFLOW_5",
        2 => "NETFLOW_V5",
        3 => "NETFLOW_V9",
        4 => "IPFIX",
        _ => UNKNOWN,
    }
}
