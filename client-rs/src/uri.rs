//! Well-known platform service URIs

/// Platform service categories
///
/// Most categories have no service on this platform; their base URI is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ServiceCategory {
    Vsm = 0,
    Display,
    AvBlock,
    Audio,
    Broadcast,
    Channel,
    ExternalDevice,
    Dvr,
    Sound,
    Subtitle,
    Drm,
    Setting,
    PhotoRenderer,
}

const SERVICE_URIS: [&str; 13] = [
    "",                                 // Vsm
    "",                                 // Display
    "",                                 // AvBlock
    "luna://com.webos.audio",           // Audio
    "",                                 // Broadcast
    "",                                 // Channel
    "",                                 // ExternalDevice
    "",                                 // Dvr
    "",                                 // Sound
    "",                                 // Subtitle
    "",                                 // Drm
    "luna://com.webos.settingsservice", // Setting
    "",                                 // PhotoRenderer
];

impl ServiceCategory {
    pub const ALL: [ServiceCategory; 13] = [
        ServiceCategory::Vsm,
        ServiceCategory::Display,
        ServiceCategory::AvBlock,
        ServiceCategory::Audio,
        ServiceCategory::Broadcast,
        ServiceCategory::Channel,
        ServiceCategory::ExternalDevice,
        ServiceCategory::Dvr,
        ServiceCategory::Sound,
        ServiceCategory::Subtitle,
        ServiceCategory::Drm,
        ServiceCategory::Setting,
        ServiceCategory::PhotoRenderer,
    ];

    /// Look up a category by its numeric value
    pub fn from_index(index: i32) -> Option<Self> {
        usize::try_from(index)
            .ok()
            .and_then(|i| Self::ALL.get(i).copied())
    }

    /// Base URI of the service, empty when the platform has none
    pub fn base_uri(self) -> &'static str {
        SERVICE_URIS[self as usize]
    }
}

/// Build the URI for `action` on the service behind `category`
pub fn service_uri(category: ServiceCategory, action: &str) -> String {
    format!("{}/{}", category.base_uri(), action)
}

/// Like [`service_uri`], for a raw category value; empty when out of range
pub fn service_uri_for_index(index: i32, action: &str) -> String {
    ServiceCategory::from_index(index)
        .map(|category| service_uri(category, action))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_services() {
        assert_eq!(
            service_uri(ServiceCategory::Audio, "getVolume"),
            "luna://com.webos.audio/getVolume"
        );
        assert_eq!(
            service_uri(ServiceCategory::Setting, "getSystemSettings"),
            "luna://com.webos.settingsservice/getSystemSettings"
        );
    }

    #[test]
    fn test_unsupported_category_yields_bare_action() {
        assert_eq!(service_uri(ServiceCategory::Drm, "foo"), "/foo");
        assert_eq!(service_uri(ServiceCategory::Vsm, ""), "/");
    }

    #[test]
    fn test_out_of_range_index() {
        assert_eq!(service_uri_for_index(-1, "foo"), "");
        assert_eq!(service_uri_for_index(13, "foo"), "");
        assert_eq!(service_uri_for_index(i32::MAX, "foo"), "");
    }

    #[test]
    fn test_index_round_trip() {
        for (i, category) in ServiceCategory::ALL.iter().enumerate() {
            assert_eq!(ServiceCategory::from_index(i as i32), Some(*category));
            assert_eq!(*category as usize, i);
        }
        assert_eq!(service_uri_for_index(12, "x"), "/x");
        assert_eq!(service_uri_for_index(3, "x"), "luna://com.webos.audio/x");
    }
}
