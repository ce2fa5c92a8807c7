//! Codec des documents protocole : parsing des actions SOAP entrantes,
//! construction des réponses, des fautes UPnP et des jeux de propriétés
//! d'événement. L'échappement des valeurs est assuré par l'émetteur XML.

use std::collections::HashMap;
use std::io::BufReader;

use thiserror::Error;
use xmltree::{Element, EmitterConfig, XMLNode};

/// Action UPnP extraite d'une enveloppe SOAP
#[derive(Debug, Clone)]
pub struct ActionDocument {
    /// Nom de l'action (ex: "Browse", "GetProtocolInfo")
    pub name: String,

    /// Namespace de l'action (ex: "urn:schemas-upnp-org:service:ContentDirectory:1")
    pub namespace: Option<String>,

    /// Arguments de l'action, à plat
    pub arguments: HashMap<String, String>,
}

#[derive(Debug, Error)]
pub enum SoapError {
    #[error("XML parse error: {0}")]
    Parse(#[from] xmltree::ParseError),

    #[error("Missing SOAP Envelope")]
    MissingEnvelope,

    #[error("Missing SOAP Body")]
    MissingBody,

    #[error("No action found in SOAP Body")]
    NoAction,

    #[error("XML write error: {0}")]
    Write(#[from] xmltree::Error),
}

/// Parse le document d'arguments d'une invocation d'action.
pub fn parse_action_document(xml: &str) -> Result<ActionDocument, SoapError> {
    let reader = BufReader::new(xml.as_bytes());
    let root = Element::parse(reader)?;

    if !root.name.ends_with("Envelope") {
        return Err(SoapError::MissingEnvelope);
    }

    let body = root
        .get_child("Body")
        .or_else(|| {
            root.children
                .iter()
                .find_map(|n| n.as_element().filter(|e| e.name.ends_with("Body")))
        })
        .ok_or(SoapError::MissingBody)?;

    // Le Body contient un élément enfant qui est l'action
    // Format: <u:ActionName xmlns:u="service-urn">...</u:ActionName>
    let action_elem = body
        .children
        .iter()
        .find_map(|n| n.as_element())
        .ok_or(SoapError::NoAction)?;

    let mut arguments = HashMap::new();
    for child in &action_elem.children {
        if let Some(elem) = child.as_element() {
            let value = elem.get_text().unwrap_or_default().to_string();
            arguments.insert(elem.name.clone(), value);
        }
    }

    Ok(ActionDocument {
        name: action_elem.name.clone(),
        namespace: action_elem.namespace.clone(),
        arguments,
    })
}

fn build_envelope_with_body(body_child: Element) -> Result<String, SoapError> {
    let mut body = Element::new("s:Body");
    body.children.push(XMLNode::Element(body_child));

    let mut envelope = Element::new("s:Envelope");
    envelope.attributes.insert(
        "xmlns:s".to_string(),
        "http://schemas.xmlsoap.org/soap/envelope/".to_string(),
    );
    envelope.attributes.insert(
        "s:encodingStyle".to_string(),
        "http://schemas.xmlsoap.org/soap/encoding/".to_string(),
    );
    envelope.children.push(XMLNode::Element(body));

    let mut buf = Vec::new();
    let config = EmitterConfig::new()
        .write_document_declaration(true)
        .perform_indent(true)
        .indent_string("  ");
    envelope.write_with_config(&mut buf, config)?;

    Ok(String::from_utf8(buf).unwrap())
}

/// Construit la réponse SOAP d'une action réussie.
///
/// Les valeurs passent par l'émetteur XML, qui échappe les caractères
/// réservés de chaque champ.
pub fn build_action_response(
    service_type: &str,
    action: &str,
    values: &[(String, String)],
) -> Result<String, SoapError> {
    let response_name = format!("u:{}Response", action);
    let mut response_elem = Element::new(&response_name);
    response_elem
        .attributes
        .insert("xmlns:u".to_string(), service_type.to_string());

    for (name, value) in values {
        let mut child = Element::new(name);
        child.children.push(XMLNode::Text(value.clone()));
        response_elem.children.push(XMLNode::Element(child));
    }

    build_envelope_with_body(response_elem)
}

/// Construit un SOAP Fault portant un code d'erreur UPnP.
pub fn build_fault(error_code: u16, error_description: &str) -> Result<String, SoapError> {
    let mut fault = Element::new("s:Fault");

    let mut faultcode = Element::new("faultcode");
    faultcode
        .children
        .push(XMLNode::Text("s:Client".to_string()));
    fault.children.push(XMLNode::Element(faultcode));

    let mut faultstring = Element::new("faultstring");
    faultstring
        .children
        .push(XMLNode::Text("UPnPError".to_string()));
    fault.children.push(XMLNode::Element(faultstring));

    let mut upnp_error = Element::new("UPnPError");
    upnp_error.attributes.insert(
        "xmlns".to_string(),
        "urn:schemas-upnp-org:control-1-0".to_string(),
    );

    let mut code_elem = Element::new("errorCode");
    code_elem
        .children
        .push(XMLNode::Text(error_code.to_string()));
    upnp_error.children.push(XMLNode::Element(code_elem));

    let mut desc_elem = Element::new("errorDescription");
    desc_elem
        .children
        .push(XMLNode::Text(error_description.to_string()));
    upnp_error.children.push(XMLNode::Element(desc_elem));

    let mut detail = Element::new("detail");
    detail.children.push(XMLNode::Element(upnp_error));
    fault.children.push(XMLNode::Element(detail));

    build_envelope_with_body(fault)
}

/// Construit le corps d'une notification d'événement GENA.
pub fn build_property_set(variables: &[(String, String)]) -> Result<String, SoapError> {
    let mut property_set = Element::new("e:propertyset");
    property_set.attributes.insert(
        "xmlns:e".to_string(),
        "urn:schemas-upnp-org:event-1-0".to_string(),
    );

    for (name, value) in variables {
        let mut variable = Element::new(name);
        variable.children.push(XMLNode::Text(value.clone()));
        let mut property = Element::new("e:property");
        property.children.push(XMLNode::Element(variable));
        property_set.children.push(XMLNode::Element(property));
    }

    let mut buf = Vec::new();
    let config = EmitterConfig::new()
        .write_document_declaration(true)
        .perform_indent(true)
        .indent_string("  ");
    property_set.write_with_config(&mut buf, config)?;

    Ok(String::from_utf8(buf).unwrap())
}
