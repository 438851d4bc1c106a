use super::lookup;

/// Export protocol a flow record was decoded from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlowType {
    #[default]
    Unknown,
    SflowV5,
    NetflowV5,
    NetflowV9,
    Ipfix,
}

impl FlowType {
    pub fn code(&self) -> u32 {
        match self {
            FlowType::Unknown => 0,
            FlowType::SflowV5 => 1,
            FlowType::NetflowV5 => 2,
            FlowType::NetflowV9 => 3,
            FlowType::Ipfix => 4,
        }
    }

    pub fn from_code(code: u32) -> Self {
        match code {
            1 => FlowType::SflowV5,
            2 => FlowType::NetflowV5,
            3 => FlowType::NetflowV9,
            4 => FlowType::Ipfix,
            _ => FlowType::Unknown,
        }
    }

    pub fn name(&self) -> &'static str {
        lookup::flow_type_name(self.code())
    }
}

/// Fields a decoded flow must expose to be turned into a log event.
///
/// Addresses are raw network-order bytes: 4 for IPv4, 16 for IPv6, empty when
/// the exporter did not report one. Timestamps are nanoseconds since the Unix
/// epoch.
pub trait FlowRecord: Send + Sync {
    fn flow_type(&self) -> FlowType;
    fn src_addr(&self) -> &[u8];
    fn dst_addr(&self) -> &[u8];
    fn src_port(&self) -> u16;
    fn dst_port(&self) -> u16;
    fn ether_type(&self) -> u32;
    fn l4_protocol(&self) -> u32;
    fn bytes(&self) -> u64;
    fn packets(&self) -> u64;
    fn time_received_ns(&self) -> u64;
    fn time_flow_start_ns(&self) -> u64;
    fn time_flow_end_ns(&self) -> u64;
    fn sequence_num(&self) -> u32;
    fn sampling_rate(&self) -> u64;
    fn sampler_addr(&self) -> &[u8];
}

/// Plain owned flow record, for decoders without a record type of their own
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlowMessage {
    pub flow_type: FlowType,
    pub src_addr: Vec<u8>,
    pub dst_addr: Vec<u8>,
    pub src_port: u16,
    pub dst_port: u16,
    pub ether_type: u32,
    pub l4_protocol: u32,
    pub bytes: u64,
    pub packets: u64,
    pub time_received_ns: u64,
    pub time_flow_start_ns: u64,
    pub time_flow_end_ns: u64,
    pub sequence_num: u32,
    pub sampling_rate: u64,
    pub sampler_addr: Vec<u8>,
}

impl FlowRecord for FlowMessage {
    fn flow_type(&self) -> FlowType {
        self.flow_type
    }
    fn src_addr(&self) -> &[u8] {
        &self.src_addr
    }
    fn dst_addr(&self) -> &[u8] {
        &self.dst_addr
    }
    fn src_port(&self) -> u16 {
        self.src_port
    }
    fn dst_port(&self) -> u16 {
        self.dst_port
    }
    fn ether_type(&self) -> u32 {
        self.ether_type
    }
    fn l4_protocol(&self) -> u32 {
        self.l4_protocol
    }
    fn bytes(&self) -> u64 {
        self.bytes
    }
    fn packets(&self) -> u64 {
        self.packets
    }
    fn time_received_ns(&self) -> u64 {
        self.time_received_ns
    }
    fn time_flow_start_ns(&self) -> u64 {
        self.time_flow_start_ns
    }
    fn time_flow_end_ns(&self) -> u64 {
        self.time_flow_end_ns
    }
    fn sequence_num(&self) -> u32 {
        self.sequence_num
    }
    fn sampling_rate(&self) -> u64 {
        self.sampling_rate
    }
    fn sampler_addr(&self) -> &[u8] {
        &self.sampler_addr
    }
}
