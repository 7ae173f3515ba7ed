use crate::{flags::SettingsFlags, frame::Frame, types::*};
use enum_map::{enum_map, EnumMap};
use log::trace;

/// Our cap on peer-initiated concurrent streams.
pub const LOCAL_MAX_CONCURRENT_STREAMS: u32 = 128;

/// Our cap on the decoded size of one header list.
pub const LOCAL_MAX_HEADER_LIST_SIZE: u32 = 65_536;

fn rfc_defaults() -> EnumMap<SettingsParameter, u32> {
    enum_map! {
        SettingsParameter::HeaderTableSize => 4096,
        SettingsParameter::EnablePush => 1,
        SettingsParameter::MaxConcurrentStreams => u32::MAX,
        SettingsParameter::InitialWindowSize => 65_535,
        SettingsParameter::MaxFrameSize => 16_384,
        SettingsParameter::MaxHeaderListSize => u32::MAX,
    }
}

/// Both sides of the SETTINGS negotiation. `local` is what we advertise
/// and enforce on inbound traffic, `remote` is what the peer advertised
/// and we must respect on outbound traffic.
#[derive(Debug, Clone)]
pub struct Settings {
    local: EnumMap<SettingsParameter, u32>,
    remote: EnumMap<SettingsParameter, u32>,
}

impl Settings {
    #[must_use]
    pub fn new() -> Self {
        let mut local = rfc_defaults();
        local[SettingsParameter::EnablePush] = 0;
        local[SettingsParameter::MaxConcurrentStreams] = LOCAL_MAX_CONCURRENT_STREAMS;
        local[SettingsParameter::MaxHeaderListSize] = LOCAL_MAX_HEADER_LIST_SIZE;
        Self {
            local,
            remote: rfc_defaults(),
        }
    }

    #[must_use]
    pub fn local(&self, param: SettingsParameter) -> u32 {
        self.local[param]
    }

    #[must_use]
    pub fn remote(&self, param: SettingsParameter) -> u32 {
        self.remote[param]
    }

    /// Applies a peer SETTINGS payload, validating each value.
    pub fn apply_remote(
        &mut self,
        params: &[(SettingsParameter, u32)],
    ) -> Result<(), H2Error> {
        for &(param, value) in params {
            match param {
                SettingsParameter::EnablePush if value > 1 => {
                    return Err(H2Error::Connection(ErrorType::ProtocolError));
                }
                SettingsParameter::InitialWindowSize
                    if i64::from(value) > MAX_WINDOW_SIZE =>
                {
                    return Err(H2Error::Connection(ErrorType::FlowControlError));
                }
                SettingsParameter::MaxFrameSize
                    if !(MIN_MAX_FRAME_SIZE..=MAX_MAX_FRAME_SIZE).contains(&value) =>
                {
                    return Err(H2Error::Connection(ErrorType::FrameSizeError));
                }
                _ => {}
            }
            trace!("peer setting {:?} = {}", param, value);
            self.remote[param] = value;
        }
        Ok(())
    }

    /// The SETTINGS frame sent right after the preface: only values that
    /// differ from the RFC defaults.
    #[must_use]
    pub fn initial_frame(&self) -> Frame {
        let defaults = rfc_defaults();
        let params = self
            .local
            .iter()
            .filter(|(param, value)| defaults[*param] != **value)
            .map(|(param, value)| (param, *value))
            .collect();
        Frame::Settings {
            flags: SettingsFlags::empty(),
            params,
        }
    }

    #[must_use]
    pub fn ack_frame() -> Frame {
        Frame::Settings {
            flags: SettingsFlags::ACK,
            params: Vec::new(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_defaults_follow_the_rfc() {
        let settings = Settings::new();
        assert_eq!(settings.remote(SettingsParameter::HeaderTableSize), 4096);
        assert_eq!(settings.remote(SettingsParameter::EnablePush), 1);
        assert_eq!(settings.remote(SettingsParameter::InitialWindowSize), 65_535);
        assert_eq!(settings.remote(SettingsParameter::MaxFrameSize), 16_384);
    }

    #[test]
    fn enable_push_must_be_boolean() {
        let mut settings = Settings::new();
        assert_eq!(
            settings.apply_remote(&[(SettingsParameter::EnablePush, 2)]),
            Err(H2Error::Connection(ErrorType::ProtocolError))
        );
        assert!(settings
            .apply_remote(&[(SettingsParameter::EnablePush, 0)])
            .is_ok());
    }

    #[test]
    fn initial_window_size_is_bounded() {
        let mut settings = Settings::new();
        assert_eq!(
            settings.apply_remote(&[(SettingsParameter::InitialWindowSize, 1 << 31)]),
            Err(H2Error::Connection(ErrorType::FlowControlError))
        );
        assert!(settings
            .apply_remote(&[(SettingsParameter::InitialWindowSize, (1 << 31) - 1)])
            .is_ok());
    }

    #[test]
    fn max_frame_size_is_bounded() {
        let mut settings = Settings::new();
        assert_eq!(
            settings.apply_remote(&[(SettingsParameter::MaxFrameSize, 16_383)]),
            Err(H2Error::Connection(ErrorType::FrameSizeError))
        );
        assert_eq!(
            settings.apply_remote(&[(SettingsParameter::MaxFrameSize, 1 << 24)]),
            Err(H2Error::Connection(ErrorType::FrameSizeError))
        );
        assert!(settings
            .apply_remote(&[(SettingsParameter::MaxFrameSize, 65_536)])
            .is_ok());
        assert_eq!(settings.remote(SettingsParameter::MaxFrameSize), 65_536);
    }

    #[test]
    fn initial_frame_advertises_non_defaults() {
        match Settings::new().initial_frame() {
            Frame::Settings { flags, params } => {
                assert!(flags.is_empty());
                assert!(params.contains(&(
                    SettingsParameter::MaxConcurrentStreams,
                    LOCAL_MAX_CONCURRENT_STREAMS
                )));
                assert!(params.contains(&(SettingsParameter::EnablePush, 0)));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
