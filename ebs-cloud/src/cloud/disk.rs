use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::{Cloud, CloudError, Result, VOLUME_NOT_FOUND_CODE};
use crate::api::{CreateVolumeRequest, DeleteVolumeRequest, DescribeVolumesRequest, Filter, Volume};
use crate::metrics::OperationTimer;
use crate::types::{Disk, DiskOptions, VOLUME_NAME_TAG_KEY, VolumeType, bytes_to_gib};

impl Cloud {
    /// Create a volume in the node's availability zone.
    #[instrument(skip(self, options), fields(capacity_bytes = options.capacity_bytes))]
    pub async fn create_disk(&self, volume_name: &str, options: &DiskOptions) -> Result<Disk> {
        let timer = OperationTimer::new("create_disk");
        let result = self.create(volume_name, options).await;
        timer.finish(&result, CloudError::code);
        result
    }

    async fn create(&self, volume_name: &str, options: &DiskOptions) -> Result<Disk> {
        let volume_type: VolumeType = options.volume_type.parse()?;
        let capacity_gib = bytes_to_gib(options.capacity_bytes);

        let iops = volume_type
            .is_provisioned_iops()
            .then(|| options.total_iops(capacity_gib));

        let request = CreateVolumeRequest {
            availability_zone: self.metadata.availability_zone.clone(),
            size: capacity_gib,
            volume_type: volume_type.to_string(),
            iops,
            tags: options.tags.clone(),
            client_token: Uuid::new_v4().to_string(),
        };

        info!(
            volume_name,
            size_gib = capacity_gib,
            volume_type = %volume_type,
            iops = ?iops,
            "Creating volume"
        );

        let response = self
            .ec2
            .create_volume(request)
            .await
            .map_err(CloudError::CreateVolume)?;

        if response.volume_id.is_empty() {
            return Err(CloudError::MissingVolumeId);
        }
        if response.size == 0 {
            return Err(CloudError::MissingVolumeSize);
        }

        info!(volume_name, volume_id = %response.volume_id, size_gib = response.size, "Volume created");
        Ok(Disk {
            volume_id: response.volume_id,
            capacity_gib: response.size,
        })
    }

    /// Delete a volume.
    ///
    /// Returns [`CloudError::VolumeNotFound`] if the cloud does not know the volume.
    #[instrument(skip(self))]
    pub async fn delete_disk(&self, volume_id: &str) -> Result<bool> {
        let timer = OperationTimer::new("delete_disk");
        let request = DeleteVolumeRequest {
            volume_id: volume_id.to_string(),
        };

        let result = match self.ec2.delete_volume(request).await {
            Ok(()) => Ok(true),
            Err(e) if e.code == VOLUME_NOT_FOUND_CODE => Err(CloudError::VolumeNotFound),
            Err(e) => {
                warn!(volume_id, error = %e, "Failed to delete volume");
                Err(CloudError::DeleteVolume(e))
            }
        };

        timer.finish(&result, CloudError::code);
        result
    }

    /// Find the disk tagged with `name`, checking that it has the requested size.
    ///
    /// Returns `Ok(None)` if no disk carries the name.
    #[instrument(skip(self))]
    pub async fn get_disk_by_name_and_size(&self, name: &str, capacity_bytes: i64) -> Result<Option<Disk>> {
        let mut request = DescribeVolumesRequest {
            filters: vec![Filter {
                name: format!("tag:{VOLUME_NAME_TAG_KEY}"),
                values: vec![name.to_string()],
            }],
            ..Default::default()
        };

        let mut volumes: Vec<Volume> = Vec::new();
        loop {
            let response = self
                .ec2
                .describe_volumes(request.clone())
                .await
                .map_err(CloudError::ListVolumes)?;
            volumes.extend(response.volumes);

            match response.next_token {
                Some(token) if !token.is_empty() => request.next_token = Some(token),
                _ => break,
            }
        }

        if volumes.len() > 1 {
            return Err(CloudError::MultipleDisks);
        }

        let Some(volume) = volumes.pop() else {
            debug!(name, "No disk found with name");
            return Ok(None);
        };

        if volume.size != bytes_to_gib(capacity_bytes) {
            return Err(CloudError::DiskExistsDifferentSize);
        }

        Ok(Some(Disk {
            volume_id: volume.volume_id,
            capacity_gib: volume.size,
        }))
    }
}
