// Packet filter compiler.
//
// A query is a whitespace-separated sequence of whitelisted keywords and
// literals, for example `ip src 10.0.0.1 and tcp syn`. Compilation checks
// every word against the whitelist, rewrites `<protocol> <field>` pairs into
// field references, validates them against the protocol's field table and
// parses the result into an expression tree. Evaluation walks that tree
// over a packet whose layers are decoded only as far as the query needs.
//
// Grammar, loosest binding first:
//
//   expr    := and ("or" and)*
//   and     := unary ("and" unary)*
//   unary   := "not" unary | primary
//   primary := "(" expr ")" | operand [cmp operand]
//   operand := field | protocol | literal
//
// A field followed directly by a literal compares for equality.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::InterceptorError;
use crate::net::addr::{Ipv4Address, MacAddress};
use crate::net::packet::CapturedPacket;
use crate::net::protocols::{
    ArpPacket, ETHERTYPE_ARP, ETHERTYPE_IPV4, EthernetFrame, IcmpPacket, Ipv4Packet, PROTO_ICMP,
    PROTO_TCP, TcpFlags, TcpHeader, icmp,
};

static LITERAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:(?:[0-9]{1,3}\.){3}[0-9]{1,3}|(?:[0-9a-f]{2}[:-]){5}[0-9a-f]{2}|0x[0-9a-f]+|[0-9]+|true|false)$")
        .expect("filter literal pattern compiles")
});

/// Deepest `not`/parenthesis nesting a query may use.
const MAX_DEPTH: usize = 64;

/// Longest query, in words. Chains of `and`/`or` build trees this deep.
const MAX_WORDS: usize = 512;

const STRUCTURAL: &[&str] = &["and", "or", "not", "(", ")", "=", ">", "<", ">=", "<="];

const FIELD_NAMES: &[&str] = &[
    "src", "dst", "proto", "opcode", "psrc", "pdst", "hwsrc", "hwdst", "type", "code", "id",
    "seq", "syn", "ack", "rst", "fin", "psh", "urg", "ece", "cwr",
];

// ---------------------------------------------------------------------------
// Protocols and fields
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Protocol {
    Eth,
    Arp,
    Ip,
    Icmp,
    Tcp,
}

impl Protocol {
    fn from_keyword(word: &str) -> Option<Self> {
        match word {
            "eth" => Some(Self::Eth),
            "arp" => Some(Self::Arp),
            "ip" => Some(Self::Ip),
            "icmp" => Some(Self::Icmp),
            "tcp" => Some(Self::Tcp),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Eth => "eth",
            Self::Arp => "arp",
            Self::Ip => "ip",
            Self::Icmp => "icmp",
            Self::Tcp => "tcp",
        }
    }

    fn field(self, name: &str) -> Option<Field> {
        let field = match (self, name) {
            (Self::Eth, "src") => Field::EthSrc,
            (Self::Eth, "dst") => Field::EthDst,
            (Self::Eth, "proto") => Field::EthProto,
            (Self::Arp, "opcode") => Field::ArpOpcode,
            (Self::Arp, "psrc") => Field::ArpPsrc,
            (Self::Arp, "pdst") => Field::ArpPdst,
            (Self::Arp, "hwsrc") => Field::ArpHwsrc,
            (Self::Arp, "hwdst") => Field::ArpHwdst,
            (Self::Ip, "src") => Field::IpSrc,
            (Self::Ip, "dst") => Field::IpDst,
            (Self::Ip, "proto") => Field::IpProto,
            (Self::Icmp, "type") => Field::IcmpType,
            (Self::Icmp, "code") => Field::IcmpCode,
            (Self::Icmp, "id") => Field::IcmpId,
            (Self::Icmp, "seq") => Field::IcmpSeq,
            (Self::Tcp, "src") => Field::TcpSrc,
            (Self::Tcp, "dst") => Field::TcpDst,
            (Self::Tcp, "seq") => Field::TcpSeq,
            (Self::Tcp, "fin") => Field::TcpFlag(TcpFlags::FIN),
            (Self::Tcp, "syn") => Field::TcpFlag(TcpFlags::SYN),
            (Self::Tcp, "rst") => Field::TcpFlag(TcpFlags::RST),
            (Self::Tcp, "psh") => Field::TcpFlag(TcpFlags::PSH),
            (Self::Tcp, "ack") => Field::TcpFlag(TcpFlags::ACK),
            (Self::Tcp, "urg") => Field::TcpFlag(TcpFlags::URG),
            (Self::Tcp, "ece") => Field::TcpFlag(TcpFlags::ECE),
            (Self::Tcp, "cwr") => Field::TcpFlag(TcpFlags::CWR),
            _ => return None,
        };
        Some(field)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    EthSrc,
    EthDst,
    EthProto,
    ArpOpcode,
    ArpPsrc,
    ArpPdst,
    ArpHwsrc,
    ArpHwdst,
    IpSrc,
    IpDst,
    IpProto,
    IcmpType,
    IcmpCode,
    IcmpId,
    IcmpSeq,
    TcpSrc,
    TcpDst,
    TcpSeq,
    TcpFlag(u8),
}

impl Field {
    fn protocol(self) -> Protocol {
        match self {
            Self::EthSrc | Self::EthDst | Self::EthProto => Protocol::Eth,
            Self::ArpOpcode | Self::ArpPsrc | Self::ArpPdst | Self::ArpHwsrc | Self::ArpHwdst => {
                Protocol::Arp
            }
            Self::IpSrc | Self::IpDst | Self::IpProto => Protocol::Ip,
            Self::IcmpType | Self::IcmpCode | Self::IcmpId | Self::IcmpSeq => Protocol::Icmp,
            Self::TcpSrc | Self::TcpDst | Self::TcpSeq | Self::TcpFlag(_) => Protocol::Tcp,
        }
    }

    fn kind(self) -> Kind {
        match self {
            Self::EthSrc | Self::EthDst | Self::ArpHwsrc | Self::ArpHwdst => Kind::Mac,
            Self::ArpPsrc | Self::ArpPdst | Self::IpSrc | Self::IpDst => Kind::Ipv4,
            Self::TcpFlag(_) => Kind::Bool,
            _ => Kind::Int,
        }
    }

    fn read(self, view: &View<'_>) -> Option<Value> {
        let value = match self {
            Self::EthSrc => Value::Mac(view.frame.src),
            Self::EthDst => Value::Mac(view.frame.dst),
            Self::EthProto => Value::Int(view.frame.ethertype.into()),
            Self::ArpOpcode => Value::Int(view.arp.as_ref()?.operation.into()),
            Self::ArpPsrc => Value::Ipv4(view.arp.as_ref()?.sender_proto),
            Self::ArpPdst => Value::Ipv4(view.arp.as_ref()?.target_proto),
            Self::ArpHwsrc => Value::Mac(view.arp.as_ref()?.sender_hw),
            Self::ArpHwdst => Value::Mac(view.arp.as_ref()?.target_hw),
            Self::IpSrc => Value::Ipv4(view.ipv4.as_ref()?.src),
            Self::IpDst => Value::Ipv4(view.ipv4.as_ref()?.dst),
            Self::IpProto => Value::Int(view.ipv4.as_ref()?.protocol.into()),
            Self::IcmpType => Value::Int(view.icmp.as_ref()?.icmp_type.into()),
            Self::IcmpCode => Value::Int(view.icmp.as_ref()?.code.into()),
            Self::IcmpId | Self::IcmpSeq => {
                let icmp = view.icmp.as_ref()?;
                if !icmp::has_id_seq(icmp.icmp_type) {
                    return None;
                }
                let v = if self == Self::IcmpId { icmp.id } else { icmp.seq };
                Value::Int(v.into())
            }
            Self::TcpSrc => Value::Int(view.tcp.as_ref()?.src_port.into()),
            Self::TcpDst => Value::Int(view.tcp.as_ref()?.dst_port.into()),
            Self::TcpSeq => Value::Int(view.tcp.as_ref()?.seq.into()),
            Self::TcpFlag(bit) => Value::Bool(view.tcp.as_ref()?.flags.contains(bit)),
        };
        Some(value)
    }
}

// ---------------------------------------------------------------------------
// Values
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Int,
    Ipv4,
    Mac,
    Bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Value {
    Int(u64),
    Ipv4(Ipv4Address),
    Mac(MacAddress),
    Bool(bool),
}

impl Value {
    fn kind(&self) -> Kind {
        match self {
            Self::Int(_) => Kind::Int,
            Self::Ipv4(_) => Kind::Ipv4,
            Self::Mac(_) => Kind::Mac,
            Self::Bool(_) => Kind::Bool,
        }
    }

    fn ordinal(&self) -> u64 {
        match self {
            Self::Int(v) => *v,
            Self::Ipv4(a) => a.to_u32().into(),
            Self::Mac(m) => m.to_u64(),
            Self::Bool(b) => (*b).into(),
        }
    }

    fn parse_literal(word: &str) -> Result<Self, InterceptorError> {
        let value = match word {
            "true" => Self::Bool(true),
            "false" => Self::Bool(false),
            w if w.contains('.') => Self::Ipv4(w.parse()?),
            w if w.contains(':') || w.contains('-') => Self::Mac(w.parse()?),
            w => {
                let parsed = match w.strip_prefix("0x") {
                    Some(hex) => u64::from_str_radix(hex, 16),
                    None => w.parse(),
                };
                Self::Int(parsed.map_err(|_| {
                    InterceptorError::FilterSyntax(format!("integer out of range: {w}"))
                })?)
            }
        };
        Ok(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Gt,
    Lt,
    Ge,
    Le,
}

impl CmpOp {
    fn from_keyword(word: &str) -> Option<Self> {
        match word {
            "=" => Some(Self::Eq),
            ">" => Some(Self::Gt),
            "<" => Some(Self::Lt),
            ">=" => Some(Self::Ge),
            "<=" => Some(Self::Le),
            _ => None,
        }
    }

    fn apply(self, lhs: &Value, rhs: &Value) -> bool {
        if lhs.kind() != rhs.kind() {
            return false;
        }
        let (a, b) = (lhs.ordinal(), rhs.ordinal());
        match self {
            Self::Eq => a == b,
            Self::Gt => a > b,
            Self::Lt => a < b,
            Self::Ge => a >= b,
            Self::Le => a <= b,
        }
    }
}

// ---------------------------------------------------------------------------
// Lexing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Proto(Protocol),
    Field(Field),
    Lit(Value),
    Cmp(CmpOp),
    And,
    Or,
    Not,
    Open,
    Close,
}

fn is_field_candidate(word: &str) -> bool {
    !LITERAL.is_match(word)
        && Protocol::from_keyword(word).is_none()
        && !STRUCTURAL.contains(&word)
}

fn lex(query: &str) -> Result<Vec<Token>, InterceptorError> {
    let words: Vec<&str> = query.split_whitespace().collect();
    if words.len() > MAX_WORDS {
        return Err(InterceptorError::FilterSyntax(format!(
            "query has {} words; at most {MAX_WORDS} are allowed",
            words.len()
        )));
    }

    // Whitelist pass. A word directly after a protocol name is a field
    // reference and is checked against that protocol instead.
    for (i, word) in words.iter().enumerate() {
        let after_protocol = i > 0 && Protocol::from_keyword(words[i - 1]).is_some();
        if LITERAL.is_match(word) || (after_protocol && is_field_candidate(word)) {
            continue;
        }
        let allowed = Protocol::from_keyword(word).is_some()
            || STRUCTURAL.contains(word)
            || FIELD_NAMES.contains(word);
        if !allowed {
            return Err(InterceptorError::IllegalKeyword((*word).to_string()));
        }
    }

    let mut tokens = Vec::with_capacity(words.len());
    let mut i = 0;
    while i < words.len() {
        let word = words[i];
        i += 1;

        if LITERAL.is_match(word) {
            tokens.push(Token::Lit(Value::parse_literal(word)?));
            continue;
        }

        if let Some(proto) = Protocol::from_keyword(word) {
            match words.get(i) {
                Some(next) if is_field_candidate(next) => {
                    let field =
                        proto
                            .field(next)
                            .ok_or_else(|| InterceptorError::UnknownField {
                                protocol: proto.name().to_string(),
                                field: (*next).to_string(),
                            })?;
                    tokens.push(Token::Field(field));
                    i += 1;
                }
                _ => tokens.push(Token::Proto(proto)),
            }
            continue;
        }

        let token = match word {
            "and" => Token::And,
            "or" => Token::Or,
            "not" => Token::Not,
            "(" => Token::Open,
            ")" => Token::Close,
            w => match CmpOp::from_keyword(w) {
                Some(op) => Token::Cmp(op),
                None => {
                    return Err(InterceptorError::FilterSyntax(format!(
                        "field '{w}' must follow a protocol name"
                    )));
                }
            },
        };
        tokens.push(token);
    }

    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Field(Field),
    Lit(Value),
}

impl Operand {
    fn kind(&self) -> Kind {
        match self {
            Self::Field(f) => f.kind(),
            Self::Lit(v) => v.kind(),
        }
    }

    fn eval(&self, view: &View<'_>) -> Option<Value> {
        match self {
            Self::Field(f) => f.read(view),
            Self::Lit(v) => Some(*v),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Const(bool),
    /// The layer decoded.
    Layer(Protocol),
    /// A bare field: its value for booleans, presence otherwise.
    Test(Field),
    Compare(Operand, CmpOp, Operand),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expr(&mut self) -> Result<Expr, InterceptorError> {
        let mut lhs = self.and()?;
        while self.eat(&Token::Or) {
            let rhs = self.and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn and(&mut self) -> Result<Expr, InterceptorError> {
        let mut lhs = self.unary()?;
        while self.eat(&Token::And) {
            let rhs = self.unary()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn descend(&mut self) -> Result<(), InterceptorError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(syntax("expression nested too deeply"));
        }
        Ok(())
    }

    fn unary(&mut self) -> Result<Expr, InterceptorError> {
        if self.eat(&Token::Not) {
            self.descend()?;
            let inner = self.unary()?;
            self.depth -= 1;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, InterceptorError> {
        let lhs = match self.next() {
            Some(Token::Open) => {
                self.descend()?;
                let inner = self.expr()?;
                if !self.eat(&Token::Close) {
                    return Err(syntax("missing ')'"));
                }
                self.depth -= 1;
                return Ok(inner);
            }
            Some(Token::Proto(p)) => return Ok(Expr::Layer(p)),
            Some(Token::Field(f)) => Operand::Field(f),
            Some(Token::Lit(v)) => Operand::Lit(v),
            Some(other) => return Err(syntax(&format!("unexpected {other:?}"))),
            None => return Err(syntax("unexpected end of query")),
        };

        let op = match self.peek() {
            Some(Token::Cmp(op)) => {
                let op = *op;
                self.pos += 1;
                Some(op)
            }
            // `ip src 10.0.0.1` means `ip src = 10.0.0.1`.
            Some(Token::Lit(_)) if matches!(lhs, Operand::Field(_)) => Some(CmpOp::Eq),
            _ => None,
        };

        let Some(op) = op else {
            return match lhs {
                Operand::Field(f) => Ok(Expr::Test(f)),
                Operand::Lit(Value::Bool(b)) => Ok(Expr::Const(b)),
                Operand::Lit(v) => Err(syntax(&format!("literal {v:?} is not a condition"))),
            };
        };

        let rhs = match self.next() {
            Some(Token::Field(f)) => Operand::Field(f),
            Some(Token::Lit(v)) => Operand::Lit(v),
            _ => return Err(syntax("comparison needs a field or literal on the right")),
        };

        check_comparison(&lhs, op, &rhs)?;
        Ok(Expr::Compare(lhs, op, rhs))
    }
}

fn syntax(detail: &str) -> InterceptorError {
    InterceptorError::FilterSyntax(detail.to_string())
}

fn check_comparison(lhs: &Operand, op: CmpOp, rhs: &Operand) -> Result<(), InterceptorError> {
    let (a, b) = (lhs.kind(), rhs.kind());
    if a != b {
        return Err(syntax(&format!("cannot compare {a:?} with {b:?}")));
    }
    if a == Kind::Bool && op != CmpOp::Eq {
        return Err(syntax("booleans only support '='"));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Which layers above Ethernet a query touches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Needs {
    arp: bool,
    ipv4: bool,
    icmp: bool,
    tcp: bool,
}

impl Needs {
    fn add(&mut self, proto: Protocol) {
        match proto {
            Protocol::Eth => {}
            Protocol::Arp => self.arp = true,
            Protocol::Ip => self.ipv4 = true,
            Protocol::Icmp => {
                self.ipv4 = true;
                self.icmp = true;
            }
            Protocol::Tcp => {
                self.ipv4 = true;
                self.tcp = true;
            }
        }
    }

    fn collect(expr: &Expr, needs: &mut Needs) {
        match expr {
            Expr::Const(_) => {}
            Expr::Layer(p) => needs.add(*p),
            Expr::Test(f) => needs.add(f.protocol()),
            Expr::Compare(lhs, _, rhs) => {
                for operand in [lhs, rhs] {
                    if let Operand::Field(f) = operand {
                        needs.add(f.protocol());
                    }
                }
            }
            Expr::Not(inner) => Self::collect(inner, needs),
            Expr::And(a, b) | Expr::Or(a, b) => {
                Self::collect(a, needs);
                Self::collect(b, needs);
            }
        }
    }
}

/// A frame with the layers a query needs, borrowed when already decoded.
struct View<'a> {
    frame: &'a EthernetFrame,
    arp: Option<Cow<'a, ArpPacket>>,
    ipv4: Option<Cow<'a, Ipv4Packet>>,
    icmp: Option<Cow<'a, IcmpPacket>>,
    tcp: Option<Cow<'a, TcpHeader>>,
}

impl<'a> View<'a> {
    fn decode(frame: &'a EthernetFrame, needs: Needs) -> Self {
        let arp = (needs.arp && frame.ethertype == ETHERTYPE_ARP)
            .then(|| ArpPacket::decode(&frame.payload).ok())
            .flatten();
        let ipv4 = (needs.ipv4 && frame.ethertype == ETHERTYPE_IPV4)
            .then(|| Ipv4Packet::decode(&frame.payload).ok())
            .flatten();
        let icmp = ipv4
            .as_ref()
            .filter(|ip| needs.icmp && ip.protocol == PROTO_ICMP)
            .and_then(|ip| IcmpPacket::decode(&ip.payload).ok());
        let tcp = ipv4
            .as_ref()
            .filter(|ip| needs.tcp && ip.protocol == PROTO_TCP)
            .and_then(|ip| TcpHeader::decode(&ip.payload).ok());
        Self {
            frame,
            arp: arp.map(Cow::Owned),
            ipv4: ipv4.map(Cow::Owned),
            icmp: icmp.map(Cow::Owned),
            tcp: tcp.map(Cow::Owned),
        }
    }

    fn borrowed(packet: &'a CapturedPacket) -> Self {
        Self {
            frame: &packet.frame,
            arp: packet.arp().map(Cow::Borrowed),
            ipv4: packet.ipv4().map(Cow::Borrowed),
            icmp: packet.icmp().map(Cow::Borrowed),
            tcp: packet.tcp().map(Cow::Borrowed),
        }
    }

    fn has(&self, proto: Protocol) -> bool {
        match proto {
            Protocol::Eth => true,
            Protocol::Arp => self.arp.is_some(),
            Protocol::Ip => self.ipv4.is_some(),
            Protocol::Icmp => self.icmp.is_some(),
            Protocol::Tcp => self.tcp.is_some(),
        }
    }
}

impl Expr {
    fn eval(&self, view: &View<'_>) -> bool {
        match self {
            Self::Const(b) => *b,
            Self::Layer(p) => view.has(*p),
            Self::Test(f) => match f.read(view) {
                Some(Value::Bool(b)) => b,
                Some(_) => true,
                None => false,
            },
            // A field of an absent layer makes the comparison false.
            Self::Compare(lhs, op, rhs) => match (lhs.eval(view), rhs.eval(view)) {
                (Some(a), Some(b)) => op.apply(&a, &b),
                _ => false,
            },
            Self::Not(inner) => !inner.eval(view),
            Self::And(a, b) => a.eval(view) && b.eval(view),
            Self::Or(a, b) => a.eval(view) || b.eval(view),
        }
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// A compiled packet filter.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    source: String,
    expr: Option<Expr>,
    needs: Needs,
}

impl Filter {
    /// The filter that accepts everything.
    pub fn accept_all() -> Self {
        Self {
            source: String::new(),
            expr: None,
            needs: Needs::default(),
        }
    }

    pub fn compile(query: &str) -> Result<Self, InterceptorError> {
        let lowered = query.trim().to_lowercase();
        if lowered.is_empty() {
            return Ok(Self::accept_all());
        }

        let mut parser = Parser {
            tokens: lex(&lowered)?,
            pos: 0,
            depth: 0,
        };
        let expr = parser.expr()?;
        if let Some(extra) = parser.peek() {
            return Err(syntax(&format!("unexpected {extra:?} after expression")));
        }

        let mut needs = Needs::default();
        Needs::collect(&expr, &mut needs);
        log::debug!("compiled filter {lowered:?} needing {needs:?}");

        Ok(Self {
            source: lowered,
            expr: Some(expr),
            needs,
        })
    }

    pub fn is_accept_all(&self) -> bool {
        self.expr.is_none()
    }

    /// Decode the layers this filter needs from `frame` and evaluate.
    pub fn matches(&self, frame: &EthernetFrame) -> bool {
        match &self.expr {
            None => true,
            Some(expr) => expr.eval(&View::decode(frame, self.needs)),
        }
    }

    /// Evaluate against an already decoded packet.
    pub fn matches_packet(&self, packet: &CapturedPacket) -> bool {
        match &self.expr {
            None => true,
            Some(expr) => expr.eval(&View::borrowed(packet)),
        }
    }

    /// Evaluate against raw frame bytes. Runt frames never match.
    pub fn matches_raw(&self, raw: &[u8]) -> bool {
        EthernetFrame::decode(raw).is_ok_and(|frame| self.matches(&frame))
    }
}

impl FromStr for Filter {
    type Err = InterceptorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::compile(s)
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.source.is_empty() {
            f.write_str("<all>")
        } else {
            f.write_str(&self.source)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::protocols::ArpPacket;

    const A: MacAddress = MacAddress::new([2, 0, 0, 0, 0, 1]);
    const B: MacAddress = MacAddress::new([2, 0, 0, 0, 0, 2]);

    fn arp_frame(op_request: bool) -> EthernetFrame {
        let ip1 = Ipv4Address::new(10, 0, 0, 1);
        let ip2 = Ipv4Address::new(10, 0, 0, 2);
        let arp = if op_request {
            ArpPacket::request(A, ip1, ip2)
        } else {
            ArpPacket::reply(A, ip1, B, ip2)
        };
        EthernetFrame::new(B, A, ETHERTYPE_ARP, arp.encode())
    }

    #[test]
    fn ut_lex_rewrites_protocol_field_pairs() {
        let tokens = lex("ip src 10.0.0.1 and tcp").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Field(Field::IpSrc),
                Token::Lit(Value::Ipv4(Ipv4Address::new(10, 0, 0, 1))),
                Token::And,
                Token::Proto(Protocol::Tcp),
            ]
        );
    }

    #[test]
    fn ut_literals() {
        assert_eq!(Value::parse_literal("0x0806").unwrap(), Value::Int(0x806));
        assert_eq!(Value::parse_literal("42").unwrap(), Value::Int(42));
        assert_eq!(
            Value::parse_literal("aa-bb-cc-dd-ee-ff").unwrap(),
            Value::Mac(MacAddress::new([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]))
        );
        assert!(matches!(
            Value::parse_literal("300.1.1.1"),
            Err(InterceptorError::AddressFormat(_))
        ));
    }

    #[test]
    fn ut_precedence_not_and_or() {
        let filter = Filter::compile("not arp or arp and false").unwrap();
        assert_eq!(
            filter.expr,
            Some(Expr::Or(
                Box::new(Expr::Not(Box::new(Expr::Layer(Protocol::Arp)))),
                Box::new(Expr::And(
                    Box::new(Expr::Layer(Protocol::Arp)),
                    Box::new(Expr::Const(false))
                )),
            ))
        );
    }

    #[test]
    fn ut_arp_fields() {
        let filter = Filter::compile("arp opcode = 2 and arp psrc 10.0.0.1").unwrap();
        assert!(filter.matches(&arp_frame(false)));
        assert!(!filter.matches(&arp_frame(true)));
        assert_eq!(filter.needs, Needs { arp: true, ..Default::default() });
    }

    #[test]
    fn ut_eth_fields_and_ordering() {
        let frame = arp_frame(true);
        assert!(Filter::compile("eth proto 0x0806").unwrap().matches(&frame));
        assert!(Filter::compile("eth proto >= 0x0800").unwrap().matches(&frame));
        assert!(!Filter::compile("eth proto < 0x0806").unwrap().matches(&frame));
        assert!(Filter::compile("eth src = 02:00:00:00:00:01").unwrap().matches(&frame));
    }

    #[test]
    fn ut_absent_layer_is_false_not_error() {
        let frame = arp_frame(true);
        assert!(!Filter::compile("ip src 10.0.0.1").unwrap().matches(&frame));
        assert!(Filter::compile("not tcp").unwrap().matches(&frame));
    }

    #[test]
    fn ut_parentheses() {
        let frame = arp_frame(true);
        let filter = Filter::compile("( ip or arp ) and eth dst 02:00:00:00:00:02").unwrap();
        assert!(filter.matches(&frame));
        assert!(matches!(
            Filter::compile("( arp"),
            Err(InterceptorError::FilterSyntax(_))
        ));
    }

    #[test]
    fn ut_deep_nesting_is_rejected() {
        let frame = arp_frame(true);
        let nested = |n: usize| format!("{}arp{}", "( ".repeat(n), " )".repeat(n));

        assert!(Filter::compile(&nested(MAX_DEPTH)).unwrap().matches(&frame));
        assert!(matches!(
            Filter::compile(&nested(MAX_DEPTH + 1)),
            Err(InterceptorError::FilterSyntax(msg)) if msg.contains("nested too deeply")
        ));
        assert!(matches!(
            Filter::compile(&format!("{}arp", "not ".repeat(100))),
            Err(InterceptorError::FilterSyntax(msg)) if msg.contains("nested too deeply")
        ));
        assert!(matches!(
            Filter::compile(&format!("{}arp", "not ".repeat(200_000))),
            Err(InterceptorError::FilterSyntax(_))
        ));

        let chain = vec!["arp"; 300].join(" and ");
        assert!(matches!(
            Filter::compile(&chain),
            Err(InterceptorError::FilterSyntax(_))
        ));
    }

    #[test]
    fn ut_compile_errors() {
        assert!(matches!(
            Filter::compile("ip src = 02:00:00:00:00:01"),
            Err(InterceptorError::FilterSyntax(_))
        ));
        assert!(matches!(
            Filter::compile("tcp syn > true"),
            Err(InterceptorError::FilterSyntax(_))
        ));
        assert!(matches!(
            Filter::compile("src 10.0.0.1"),
            Err(InterceptorError::FilterSyntax(_))
        ));
        assert!(matches!(
            Filter::compile("arp and"),
            Err(InterceptorError::FilterSyntax(_))
        ));
        assert!(matches!(
            Filter::compile("eth seq 1"),
            Err(InterceptorError::UnknownField { .. })
        ));
    }

    #[test]
    fn ut_empty_query_accepts_all() {
        let filter = Filter::compile("   ").unwrap();
        assert!(filter.is_accept_all());
        assert!(filter.matches_raw(&arp_frame(true).encode()));
        assert!(!Filter::compile("arp").unwrap().matches_raw(&[0u8; 4]));
    }
}
