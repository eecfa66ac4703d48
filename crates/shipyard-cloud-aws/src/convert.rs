//! EC2 SDK types to shipyard resources, and SDK errors to [`CloudError`]

use aws_sdk_ec2::error::{DisplayErrorContext, ProvideErrorMetadata};
use aws_sdk_ec2::types::{Filter, Image, Instance, ResourceType, Tag, TagSpecification};
use shipyard_cloud::{CloudError, Server, ServerStatus, Volume};

pub fn filter(name: &str, values: &[&str]) -> Filter {
    values
        .iter()
        .fold(Filter::builder().name(name), |b, v| b.values(*v))
        .build()
}

pub fn name_tag(resource: ResourceType, name: &str) -> TagSpecification {
    TagSpecification::builder()
        .resource_type(resource)
        .tags(Tag::builder().key("Name").value(name).build())
        .build()
}

fn tag_name(tags: &[Tag]) -> String {
    tags.iter()
        .find(|t| t.key() == Some("Name"))
        .and_then(|t| t.value())
        .unwrap_or_default()
        .to_string()
}

pub fn instance_to_server(instance: &Instance) -> Server {
    let state = instance
        .state()
        .and_then(|s| s.name())
        .map(|n| n.as_str())
        .unwrap_or("pending");

    Server {
        id: instance.instance_id().unwrap_or_default().to_string(),
        name: tag_name(instance.tags()),
        status: ServerStatus::from_vendor(state),
        public_ipv4: instance.public_ip_address().map(str::to_string),
        private_ipv4: instance.private_ip_address().map(str::to_string),
    }
}

pub fn ebs_to_volume(volume: &aws_sdk_ec2::types::Volume) -> Volume {
    let attachment = volume.attachments().first();
    Volume {
        id: volume.volume_id().unwrap_or_default().to_string(),
        name: tag_name(volume.tags()),
        size_gb: volume.size().unwrap_or_default().max(0) as u32,
        location: volume.availability_zone().map(str::to_string),
        status: volume
            .state()
            .map(|s| s.as_str().to_string())
            .unwrap_or_default(),
        server_id: attachment
            .and_then(|a| a.instance_id())
            .map(str::to_string),
        device_path: attachment
            .and_then(|a| a.device())
            .filter(|d| !d.is_empty())
            .map(str::to_string),
    }
}

/// Newest image by creation date (ISO 8601 strings sort chronologically)
pub fn newest_image(images: &[Image]) -> Option<&Image> {
    images
        .iter()
        .filter(|i| i.image_id().is_some())
        .max_by(|a, b| a.creation_date().cmp(&b.creation_date()))
}

/// Map an EC2 error code onto the shared error taxonomy
pub fn from_code(code: Option<&str>, message: String) -> CloudError {
    match code.unwrap_or_default() {
        c if c.ends_with(".NotFound") => CloudError::NotFound(message),
        "AuthFailure" | "UnauthorizedOperation" | "InvalidClientTokenId" | "SignatureDoesNotMatch" => {
            CloudError::Authentication(message)
        }
        "RequestLimitExceeded" | "Throttling" => CloudError::RateLimit(message),
        "DependencyViolation" | "IncorrectState" | "VolumeInUse" | "InvalidGroup.InUse" => {
            CloudError::Conflict(message)
        }
        c if c.starts_with("InvalidParameter") || c == "MissingParameter" => {
            CloudError::Validation(message)
        }
        "InternalError" | "Unavailable" | "ServiceUnavailable" => CloudError::Api {
            status: 503,
            message,
        },
        _ => CloudError::Api {
            status: 400,
            message,
        },
    }
}

pub fn aws_error<E>(operation: &str, err: E) -> CloudError
where
    E: ProvideErrorMetadata + std::error::Error,
{
    let code = err.code().map(str::to_string);
    from_code(
        code.as_deref(),
        format!("{}: {}", operation, DisplayErrorContext(&err)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_ec2::types::{InstanceState, InstanceStateName, VolumeAttachment, VolumeState};

    #[test]
    fn test_instance_to_server() {
        let instance = Instance::builder()
            .instance_id("i-0abc")
            .state(InstanceState::builder().name(InstanceStateName::Running).build())
            .tags(Tag::builder().key("Name").value("myapp-master-1").build())
            .public_ip_address("198.51.100.4")
            .private_ip_address("10.0.1.12")
            .build();

        let server = instance_to_server(&instance);
        assert_eq!(server.id, "i-0abc");
        assert_eq!(server.name, "myapp-master-1");
        assert!(server.is_ready());
        assert_eq!(server.private_ipv4.as_deref(), Some("10.0.1.12"));
    }

    #[test]
    fn test_ebs_to_volume_reads_attachment() {
        let volume = aws_sdk_ec2::types::Volume::builder()
            .volume_id("vol-1")
            .size(20)
            .state(VolumeState::InUse)
            .tags(Tag::builder().key("Name").value("myapp-master-data").build())
            .attachments(
                VolumeAttachment::builder()
                    .instance_id("i-0abc")
                    .device("/dev/xvdf")
                    .build(),
            )
            .build();

        let v = ebs_to_volume(&volume);
        assert_eq!(v.name, "myapp-master-data");
        assert!(v.is_attached_to("i-0abc"));
        assert_eq!(v.device_path.as_deref(), Some("/dev/xvdf"));
    }

    #[test]
    fn test_newest_image() {
        let images = vec![
            Image::builder()
                .image_id("ami-old")
                .creation_date("2024-01-10T00:00:00.000Z")
                .build(),
            Image::builder()
                .image_id("ami-new")
                .creation_date("2024-06-01T00:00:00.000Z")
                .build(),
        ];
        assert_eq!(newest_image(&images).unwrap().image_id(), Some("ami-new"));
    }

    #[test]
    fn test_error_codes() {
        assert!(from_code(Some("InvalidInstanceID.NotFound"), "x".into()).is_not_found());
        assert!(matches!(
            from_code(Some("AuthFailure"), "x".into()),
            CloudError::Authentication(_)
        ));
        assert!(from_code(Some("RequestLimitExceeded"), "x".into()).is_retryable());
        assert!(matches!(
            from_code(Some("DependencyViolation"), "x".into()),
            CloudError::Conflict(_)
        ));
    }
}
