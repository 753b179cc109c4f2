//! The SCPI dialect: a minimal positional template formatter (`%d`,
//! `%s`, `%E`) plus the fixed set of command templates every supported
//! model shares. Every model in `model.rs` uses the same dialect; a
//! model whose instrument speaks a genuinely different SCPI subset
//! would get its own table here, keyed the same way.

/// The command buffer size enforced by testable property #2: any
/// formatted command must fit with room to spare.
pub const COMMAND_BUFFER_SIZE: usize = 31;

#[derive(Debug, Clone, Copy)]
pub enum Arg<'a> {
    Int(i64),
    Str(&'a str),
    Float(f64),
}

/// Substitutes `%d`/`%s`/`%E` tokens in `template` with `args`, taken in
/// order. Unrecognized `%x` escapes are passed through literally.
pub fn format_template(template: &str, args: &[Arg]) -> String {
    let mut out = String::with_capacity(template.len() + 8);
    let mut chars = template.chars().peekable();
    let mut args = args.iter();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('d') => match args.next() {
                Some(Arg::Int(v)) => out.push_str(&v.to_string()),
                _ => out.push_str("%d"),
            },
            Some('s') => match args.next() {
                Some(Arg::Str(v)) => out.push_str(v),
                _ => out.push_str("%s"),
            },
            Some('E') => match args.next() {
                Some(Arg::Float(v)) => out.push_str(&format_scientific(*v)),
                _ => out.push_str("%E"),
            },
            Some(other) => {
                out.push('%');
                out.push(other);
            }
            None => out.push('%'),
        }
    }

    out
}

/// Six-digit-mantissa scientific notation matching what instruments
/// expect for `%E` arguments, e.g. `1.000000E-3`.
fn format_scientific(v: f64) -> String {
    if v == 0.0 {
        return String::from("0.000000E+0");
    }
    let exp = v.abs().log10().floor() as i32;
    let mantissa = v / 10f64.powi(exp);
    let sign = if exp >= 0 { "+" } else { "-" };
    format!("{mantissa:.6}E{sign}{}", exp.abs())
}

/// A command kind, shared by every model's dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    GetIdn,
    OpcQuery,
    GetTimebase,
    SetTimebase,
    GetVdiv,
    SetVdiv,
    GetCoupling,
    SetCoupling,
    GetTriggerSource,
    SetTriggerSource,
    GetTriggerSlope,
    SetTriggerSlope,
    GetHorizTriggerPos,
    SetHorizTriggerPos,
    SetAnalogChannelState,
    SetDigitalChannelState,
    SetPodState,
    GetAnalogData,
    GetLogicData,
    GetSampleRatePoints,
    GetSamplerate,
}

pub fn template_for(kind: CommandKind) -> &'static str {
    match kind {
        CommandKind::GetIdn => "*IDN?",
        CommandKind::OpcQuery => "*OPC?",
        CommandKind::GetTimebase => ":TIM:SCAL?",
        CommandKind::SetTimebase => ":TIM:SCAL %E",
        CommandKind::GetVdiv => ":CHAN%d:SCAL?",
        CommandKind::SetVdiv => ":CHAN%d:SCAL %E",
        CommandKind::GetCoupling => ":CHAN%d:COUP?",
        CommandKind::SetCoupling => ":CHAN%d:COUP %s",
        CommandKind::GetTriggerSource => ":TRIG:A:SOUR?",
        CommandKind::SetTriggerSource => ":TRIG:A:SOUR %s",
        CommandKind::GetTriggerSlope => ":TRIG:A:EDGE:SLOP?",
        CommandKind::SetTriggerSlope => ":TRIG:A:EDGE:SLOP %s",
        CommandKind::GetHorizTriggerPos => ":TIM:POS?",
        CommandKind::SetHorizTriggerPos => ":TIM:POS %E",
        CommandKind::SetAnalogChannelState => ":CHAN%d:STAT %d",
        CommandKind::SetDigitalChannelState => ":DIG%d:STAT %d",
        CommandKind::SetPodState => ":POD%d:STAT %d",
        CommandKind::GetAnalogData => ":CHAN%d:DATA?",
        CommandKind::GetLogicData => ":POD%d:DATA?",
        CommandKind::GetSampleRatePoints => ":CHAN%d:DATA:POINTS?",
        CommandKind::GetSamplerate => ":ACQ:SRAT?",
    }
}

pub fn build(kind: CommandKind, args: &[Arg]) -> String {
    format_template(template_for(kind), args)
}
