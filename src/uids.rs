//! Well-known UID declarations
//!
//! A small selection of the standard UID registry:
//! the transfer syntaxes and SOP classes
//! which the service layer and its tests refer to by name.
//! Nodes negotiating other SOP classes may pass any UID string
//! to the association options.

/// SOP Class: Verification SOP Class
pub const VERIFICATION: &str = "1.2.840.10008.1.1";
/// Transfer Syntax: Implicit VR Little Endian: Default Transfer Syntax for DICOM
pub const IMPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2";
/// Transfer Syntax: Explicit VR Little Endian
pub const EXPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2.1";
/// Transfer Syntax: Deflated Explicit VR Little Endian
pub const DEFLATED_EXPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2.1.99";
/// Transfer Syntax: Explicit VR Big Endian (Retired)
pub const EXPLICIT_VR_BIG_ENDIAN: &str = "1.2.840.10008.1.2.2";

/// SOP Class: Computed Radiography Image Storage
pub const COMPUTED_RADIOGRAPHY_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.1";
/// SOP Class: Digital Mammography X-Ray Image Storage - For Presentation
pub const DIGITAL_MAMMOGRAPHY_X_RAY_IMAGE_STORAGE_FOR_PRESENTATION: &str =
    "1.2.840.10008.5.1.4.1.1.1.2";
/// SOP Class: CT Image Storage
pub const CT_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.2";
/// SOP Class: MR Image Storage
pub const MR_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.4";
/// SOP Class: Ultrasound Image Storage
pub const ULTRASOUND_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.6.1";
/// SOP Class: Secondary Capture Image Storage
pub const SECONDARY_CAPTURE_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.7";
/// SOP Class: Encapsulated PDF Storage
pub const ENCAPSULATED_PDF_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.104.1";

/// SOP Class: Patient Root Query/Retrieve Information Model - FIND
pub const PATIENT_ROOT_QUERY_RETRIEVE_FIND: &str = "1.2.840.10008.5.1.4.1.2.1.1";
/// SOP Class: Patient Root Query/Retrieve Information Model - MOVE
pub const PATIENT_ROOT_QUERY_RETRIEVE_MOVE: &str = "1.2.840.10008.5.1.4.1.2.1.2";
/// SOP Class: Patient Root Query/Retrieve Information Model - GET
pub const PATIENT_ROOT_QUERY_RETRIEVE_GET: &str = "1.2.840.10008.5.1.4.1.2.1.3";
/// SOP Class: Study Root Query/Retrieve Information Model - FIND
pub const STUDY_ROOT_QUERY_RETRIEVE_FIND: &str = "1.2.840.10008.5.1.4.1.2.2.1";
/// SOP Class: Study Root Query/Retrieve Information Model - MOVE
pub const STUDY_ROOT_QUERY_RETRIEVE_MOVE: &str = "1.2.840.10008.5.1.4.1.2.2.2";
/// SOP Class: Study Root Query/Retrieve Information Model - GET
pub const STUDY_ROOT_QUERY_RETRIEVE_GET: &str = "1.2.840.10008.5.1.4.1.2.2.3";

/// The SOP classes of the verification service.
pub const VERIFICATION_CLASSES: &[&str] = &[VERIFICATION];

/// A selection of SOP classes of the storage service.
pub const STORAGE_CLASSES: &[&str] = &[
    COMPUTED_RADIOGRAPHY_IMAGE_STORAGE,
    DIGITAL_MAMMOGRAPHY_X_RAY_IMAGE_STORAGE_FOR_PRESENTATION,
    CT_IMAGE_STORAGE,
    MR_IMAGE_STORAGE,
    ULTRASOUND_IMAGE_STORAGE,
    SECONDARY_CAPTURE_IMAGE_STORAGE,
    ENCAPSULATED_PDF_STORAGE,
];

/// The SOP classes of the query/retrieve FIND services.
pub const QUERY_RETRIEVE_FIND_CLASSES: &[&str] = &[
    PATIENT_ROOT_QUERY_RETRIEVE_FIND,
    STUDY_ROOT_QUERY_RETRIEVE_FIND,
];

/// The SOP classes of the query/retrieve GET services.
pub const QUERY_RETRIEVE_GET_CLASSES: &[&str] = &[
    PATIENT_ROOT_QUERY_RETRIEVE_GET,
    STUDY_ROOT_QUERY_RETRIEVE_GET,
];

/// The standard uncompressed transfer syntaxes.
pub const STANDARD_TRANSFER_SYNTAXES: &[&str] = &[
    IMPLICIT_VR_LITTLE_ENDIAN,
    EXPLICIT_VR_LITTLE_ENDIAN,
    EXPLICIT_VR_BIG_ENDIAN,
    DEFLATED_EXPLICIT_VR_LITTLE_ENDIAN,
];

/// Trim trailing padding from a UID taken off the wire.
pub(crate) fn trim_uid(uid: &str) -> &str {
    uid.trim_end_matches(|c: char| c.is_whitespace() || c == '\0')
}

#[cfg(test)]
mod tests {
    use super::trim_uid;

    #[test]
    fn test_trim_uid() {
        assert_eq!(trim_uid("1.2.3.4"), "1.2.3.4");
        assert_eq!(trim_uid("1.2.3.4\0"), "1.2.3.4");
        assert_eq!(trim_uid("1.2.3.45\0"), "1.2.3.45");
        assert_eq!(trim_uid("1.2.3.45 "), "1.2.3.45");
    }
}
