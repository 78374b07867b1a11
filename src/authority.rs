//! Hickory DNS authority serving backend leases for one zone.

use async_trait::async_trait;
use hickory_proto::op::ResponseCode;
use hickory_proto::rr::rdata::{A, AAAA, NS, SOA};
use hickory_proto::rr::{DNSClass, LowerName, Name, RData, Record, RecordSet, RecordType};
use hickory_server::authority::{
    Authority, LookupControlFlow, LookupError, LookupOptions, LookupRecords, MessageRequest,
    UpdateResult, ZoneType,
};
use hickory_server::server::RequestInfo;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::config::SoaConfig;
use crate::lease::LiveAddress;
use crate::resolver::{Resolution, ResolutionService};

/// Authority answering `<backend>.<zone>` from the lease registry.
pub struct DynamicAuthority {
    origin: LowerName,
    resolver: ResolutionService,
    soa: Arc<SoaConfig>,
}

impl DynamicAuthority {
    /// Create an authority for `zone`.
    pub fn new(
        zone: &str,
        resolver: ResolutionService,
        soa: SoaConfig,
    ) -> Result<Self, hickory_proto::ProtoError> {
        let mut origin = Name::from_ascii(zone)?;
        origin.set_fqdn(true);

        Ok(Self {
            origin: origin.into(),
            resolver,
            soa: Arc::new(soa),
        })
    }

    /// Backend name for a query name in this zone.
    ///
    /// Returns `None` for the apex and for names outside the zone.
    pub fn backend_name(&self, name: &LowerName) -> Option<String> {
        if !self.origin.zone_of(name) {
            return None;
        }
        let name = Name::from(name.clone());
        let prefix = name.num_labels().checked_sub(self.origin.num_labels())?;
        if prefix == 0 {
            return None;
        }

        let labels: Vec<String> = name
            .iter()
            .take(prefix as usize)
            .map(|label| String::from_utf8_lossy(label).into_owned())
            .collect();
        Some(labels.join("."))
    }

    /// One address record per live lease, each carrying that lease's
    /// remaining TTL.
    fn address_records(
        &self,
        name: Name,
        rtype: RecordType,
        addresses: &[LiveAddress],
    ) -> RecordSet {
        let mut record_set = RecordSet::new(name.clone(), rtype, 0);

        for live in addresses {
            let rdata = match live.address {
                IpAddr::V4(v4) => RData::A(A::from(v4)),
                IpAddr::V6(v6) => RData::AAAA(AAAA::from(v6)),
            };
            let mut record = Record::from_rdata(name.clone(), live.ttl, rdata);
            record.set_dns_class(DNSClass::IN);
            record_set.insert(record, 0);
        }

        record_set
    }

    fn server_name(&self) -> Name {
        Name::from_ascii(&self.soa.mname).unwrap_or_else(|_| Name::root())
    }

    /// Single-record set at the zone apex.
    fn apex_record(&self, rdata: RData) -> RecordSet {
        let name = Name::from(self.origin.clone());
        let mut record = Record::from_rdata(name.clone(), self.soa.ttl, rdata);
        record.set_dns_class(DNSClass::IN);

        let mut record_set = RecordSet::new(name, record.record_type(), 0);
        record_set.insert(record, 0);
        record_set
    }

    /// SOA for this zone; the serial follows registry changes.
    fn soa_record(&self) -> RecordSet {
        self.apex_record(RData::SOA(SOA::new(
            self.server_name(),
            Name::from_ascii(&self.soa.rname).unwrap_or_else(|_| Name::root()),
            self.resolver.store().serial(),
            self.soa.refresh as i32,
            self.soa.retry as i32,
            self.soa.expire as i32,
            self.soa.minimum,
        )))
    }

    fn ns_record(&self) -> RecordSet {
        self.apex_record(RData::NS(NS(self.server_name())))
    }

    fn answer(
        lookup_options: LookupOptions,
        record_set: RecordSet,
    ) -> LookupControlFlow<LookupRecords> {
        LookupControlFlow::Break(Ok(LookupRecords::new(lookup_options, Arc::new(record_set))))
    }

    fn nxdomain() -> LookupControlFlow<LookupRecords> {
        LookupControlFlow::Break(Err(LookupError::ResponseCode(ResponseCode::NXDomain)))
    }
}

#[async_trait]
impl Authority for DynamicAuthority {
    type Lookup = LookupRecords;

    fn zone_type(&self) -> ZoneType {
        ZoneType::Primary
    }

    fn is_axfr_allowed(&self) -> bool {
        false
    }

    fn origin(&self) -> &LowerName {
        &self.origin
    }

    async fn lookup(
        &self,
        name: &LowerName,
        rtype: RecordType,
        lookup_options: LookupOptions,
    ) -> LookupControlFlow<Self::Lookup> {
        trace!(name = %name, rtype = ?rtype, "DNS lookup");

        let Some(backend) = self.backend_name(name) else {
            if name != &self.origin {
                return Self::nxdomain();
            }
            debug!(name = %name, rtype = ?rtype, "apex lookup");
            return match rtype {
                RecordType::SOA => Self::answer(lookup_options, self.soa_record()),
                RecordType::NS => Self::answer(lookup_options, self.ns_record()),
                _ => Self::nxdomain(),
            };
        };

        match self.resolver.resolve(&backend, rtype) {
            Resolution::Found(addresses) => {
                let record_set = self.address_records(Name::from(name.clone()), rtype, &addresses);
                Self::answer(lookup_options, record_set)
            }
            // Unknown backends and unsupported types look the same to clients.
            Resolution::NotFound | Resolution::Unsupported => Self::nxdomain(),
        }
    }

    async fn search(
        &self,
        request_info: RequestInfo<'_>,
        lookup_options: LookupOptions,
    ) -> LookupControlFlow<Self::Lookup> {
        self.lookup(
            request_info.query.name(),
            request_info.query.query_type(),
            lookup_options,
        )
        .await
    }

    async fn get_nsec_records(
        &self,
        _name: &LowerName,
        _lookup_options: LookupOptions,
    ) -> LookupControlFlow<Self::Lookup> {
        LookupControlFlow::Break(Err(LookupError::ResponseCode(ResponseCode::NoError)))
    }

    async fn update(&self, _update: &MessageRequest) -> UpdateResult<bool> {
        // Registrations arrive over HTTP only.
        Err(ResponseCode::NotImp)
    }
}
