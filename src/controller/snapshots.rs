//! Snapshot definitions and snapshots
//!
//! A snapshot shares the resource name of its definition and carries a
//! snapshot name. Taking one copies the definition, its volume definitions
//! and DRBD data, and the layer tree of every deployed resource. Snapshots
//! hold no TCP ports, DRBD secrets or minor numbers.

use super::{now_millis, Controller};
use crate::domain::layers::{DrbdRscDfnData, DrbdVlmDfnData};
use crate::domain::names::{ResourceName, SnapshotName};
use crate::domain::objects::{
    Resource, ResourceDefinition, ResourceKey, RscDfnFlags, RscDfnKey, VlmDfnKey, Volume, VolumeDefinition,
};
use crate::domain::security::{AccessContext, AccessType, ObjectProtection};
use crate::error::{Error, Result};
use tracing::{debug, info};
use uuid::Uuid;

impl Controller {
    /// Take snapshot `snap` of every deployed resource of `rsc`
    pub async fn create_snapshot(&self, ctx: &AccessContext, rsc: &str, snap: &str) -> Result<ResourceDefinition> {
        let rsc = ResourceName::new(rsc)?;
        let snap = SnapshotName::new(snap)?;
        let mut tx = self.begin().await;
        let live = tx.cache().require_rsc_dfn(&RscDfnKey::new(rsc, None))?.clone();
        self.require_access(&tx, ctx, &ObjectProtection::rsc_dfn_path(live.name.key()), AccessType::Change)?;

        let key = RscDfnKey::new(live.name.clone(), Some(snap.clone()));
        if tx.cache().rsc_dfns.contains_key(&key) {
            return Err(Error::AlreadyExists {
                kind: "snapshot definition",
                name: key.to_string(),
            });
        }

        let dfn = ResourceDefinition {
            uuid: Uuid::new_v4(),
            snap: Some(snap.clone()),
            flags: RscDfnFlags::empty(),
            ..live.clone()
        };
        tx.push(self.drivers.rsc_dfns.upsert(&dfn));
        tx.cache_mut().rsc_dfns.insert(key.clone(), dfn.clone());

        let drbd_rsc_dfns: Vec<DrbdRscDfnData> = tx
            .cache()
            .drbd_rsc_dfns
            .values()
            .filter(|d| d.name.rsc == live.name && d.name.snap.is_none())
            .cloned()
            .collect();
        for data in drbd_rsc_dfns {
            let mut copy = data;
            copy.name.snap = Some(snap.clone());
            copy.tcp_port = None;
            copy.secret = None;
            tx.push(self.drivers.drbd_rsc_dfns.upsert(&copy));
            tx.cache_mut().drbd_rsc_dfns.insert(copy.name.clone(), copy);
        }

        let vlm_dfns: Vec<VolumeDefinition> = tx.cache().vlm_dfns_of(&live.key()).into_iter().cloned().collect();
        for vlm_dfn in vlm_dfns {
            let copy = VolumeDefinition {
                uuid: Uuid::new_v4(),
                snap: Some(snap.clone()),
                ..vlm_dfn
            };
            tx.push(self.drivers.vlm_dfns.upsert(&copy));
            tx.cache_mut().vlm_dfns.insert(copy.key(), copy);
        }

        let drbd_vlm_dfns: Vec<DrbdVlmDfnData> = tx
            .cache()
            .drbd_vlm_dfns
            .values()
            .filter(|d| d.name.rsc == live.name && d.name.snap.is_none())
            .cloned()
            .collect();
        for data in drbd_vlm_dfns {
            let mut copy = data;
            copy.name.snap = Some(snap.clone());
            copy.minor = None;
            tx.push(self.drivers.drbd_vlm_dfns.upsert(&copy));
            tx.cache_mut()
                .drbd_vlm_dfns
                .insert((copy.name.clone(), copy.vlm_nr), copy);
        }

        let resources: Vec<Resource> = tx.cache().resources_of(&live.key()).into_iter().cloned().collect();
        let taken_at = now_millis();
        for resource in resources {
            let source = resource.key();
            let snapshot = Resource {
                uuid: Uuid::new_v4(),
                snap: Some(snap.clone()),
                create_timestamp: Some(taken_at),
                layer_root: None,
                ..resource
            };
            let target = snapshot.key();
            tx.push(self.drivers.resources.upsert(&snapshot));
            tx.cache_mut().resources.insert(target.clone(), snapshot);

            let volumes: Vec<Volume> = tx.cache().volumes_of(&source).into_iter().cloned().collect();
            for volume in volumes {
                let copy = Volume {
                    uuid: Uuid::new_v4(),
                    snap: Some(snap.clone()),
                    ..volume
                };
                tx.push(self.drivers.volumes.upsert(&copy));
                tx.cache_mut().volumes.insert(copy.key(), copy);
            }

            self.copy_layer_tree(&mut tx, &source, &target)?;
        }
        tx.commit().await?;

        info!("Created snapshot {}", key);
        Ok(dfn)
    }

    /// Delete snapshot `snap` of `rsc` with all its snapshot objects
    pub async fn delete_snapshot(&self, ctx: &AccessContext, rsc: &str, snap: &str) -> Result<()> {
        let key = RscDfnKey::new(ResourceName::new(rsc)?, Some(SnapshotName::new(snap)?));
        let mut tx = self.begin().await;
        let dfn = tx.cache().require_rsc_dfn(&key)?.clone();
        self.require_access(&tx, ctx, &ObjectProtection::rsc_dfn_path(key.rsc.key()), AccessType::Change)?;

        let snapshots: Vec<ResourceKey> = tx.cache().resources_of(&key).iter().map(|r| r.key()).collect();
        for snapshot in &snapshots {
            self.remove_resource(&mut tx, snapshot)?;
        }
        let vlm_dfns: Vec<VlmDfnKey> = tx.cache().vlm_dfns_of(&key).iter().map(|d| d.key()).collect();
        for vlm_dfn in &vlm_dfns {
            self.remove_vlm_dfn(&mut tx, vlm_dfn)?;
        }
        self.remove_drbd_rsc_dfns(&mut tx, &key);
        tx.push(self.drivers.rsc_dfns.delete(&dfn));
        tx.cache_mut().rsc_dfns.remove(&key);
        tx.commit().await?;

        debug!("Deleted snapshot {} with {} snapshot resources", key, snapshots.len());
        Ok(())
    }
}
