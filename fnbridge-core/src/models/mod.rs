pub mod jellyfin;

pub use jellyfin::{
    AuthenticationResult, MediaSourceInfo, MediaStream, PlaybackInfoResponse, PublicSystemInfo,
    SessionInfo, UserDto,
};
